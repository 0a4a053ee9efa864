pub mod artifacts;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::Settings;
use crate::error::{RelayError, Result};
use crate::mounts::mounted_targets;

pub use artifacts::ArtifactSet;

#[derive(Debug, Clone)]
pub struct SearchPlan<'a> {
    pub configured: Option<&'a Path>,
    pub roots: &'a [PathBuf],
    pub mount_targets: &'a [PathBuf],
    pub marker: &'a str,
    pub depth: usize,
}

/// Finds the source directory for an upload using the configured directory,
/// the search roots, and the current mount table.
pub fn locate_source(settings: &Settings) -> Result<ArtifactSet> {
    let mount_targets = mounted_targets().unwrap_or_default();
    locate(&SearchPlan {
        configured: settings.source_dir.as_deref(),
        roots: &settings.search_roots,
        mount_targets: &mount_targets,
        marker: &settings.source_marker,
        depth: settings.search_depth,
    })
}

pub fn locate(plan: &SearchPlan<'_>) -> Result<ArtifactSet> {
    if let Some(dir) = plan.configured {
        if dir.is_dir() {
            if let Some(set) = artifacts::newest_in_dir(dir)? {
                debug!(dir = %dir.display(), stem = %set.stem, "using configured source");
                return Ok(set);
            }
            info!(dir = %dir.display(), "configured source has no backup image; searching");
        } else {
            info!(dir = %dir.display(), "configured source is missing; searching");
        }
    }

    let candidates = candidate_dirs(plan);
    let mut best: Option<ArtifactSet> = None;
    // BTreeSet order makes the smallest path win ties.
    for dir in &candidates {
        let Ok(Some(set)) = artifacts::newest_in_dir(dir) else {
            continue;
        };
        let newer = best.as_ref().map_or(true, |b| set.modified > b.modified);
        if newer {
            best = Some(set);
        }
    }
    match best {
        Some(set) => {
            info!(dir = %set.dir.display(), stem = %set.stem, "located backup source");
            Ok(set)
        }
        None => Err(RelayError::NoSourceFound(format!(
            "no directory containing *{} under {} (marker {:?})",
            artifacts::PRIMARY_SUFFIX,
            describe_roots(plan),
            plan.marker
        ))),
    }
}

fn describe_roots(plan: &SearchPlan<'_>) -> String {
    let roots: Vec<String> = plan.roots.iter().map(|r| r.display().to_string()).collect();
    if roots.is_empty() {
        "mounted filesystems".to_string()
    } else {
        format!("{} or mounted filesystems", roots.join(", "))
    }
}

fn name_has_marker(path: &Path, marker: &str) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase().contains(marker))
        .unwrap_or(false)
}

fn candidate_dirs(plan: &SearchPlan<'_>) -> BTreeSet<PathBuf> {
    let marker = plan.marker.to_lowercase();
    let mut walk_from: Vec<PathBuf> = plan.roots.to_vec();
    let mut out = BTreeSet::new();
    for target in plan.mount_targets {
        if target.to_string_lossy().to_lowercase().contains(&marker) {
            out.insert(target.clone());
            walk_from.push(target.clone());
        }
    }
    for root in walk_from {
        if !root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&root)
            .max_depth(plan.depth)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_dir() && name_has_marker(entry.path(), &marker) {
                out.insert(entry.path().to_path_buf());
            }
        }
    }
    out
}
