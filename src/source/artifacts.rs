use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const PRIMARY_SUFFIX: &str = ".img.zst.gpg";
pub const CHECKSUM_SUFFIX: &str = ".img.zst.gpg.sha256";
pub const PARTITION_TABLE_SUFFIX: &str = ".sfdisk";
pub const LOG_SUFFIX: &str = ".log";
pub const LATEST_GOOD_STEM: &str = "latest-good";

/// The newest backup image in a directory plus its sidecars, all sharing `stem`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub dir: PathBuf,
    pub stem: String,
    pub modified: SystemTime,
}

impl ArtifactSet {
    pub fn primary_name(&self) -> String {
        format!("{}{}", self.stem, PRIMARY_SUFFIX)
    }

    pub fn required_names(&self) -> [String; 3] {
        [
            self.primary_name(),
            format!("{}{}", self.stem, CHECKSUM_SUFFIX),
            format!("{}{}", self.stem, PARTITION_TABLE_SUFFIX),
        ]
    }

    pub fn optional_names(&self) -> [String; 4] {
        [
            format!("{}{}", self.stem, LOG_SUFFIX),
            format!("{}{}", LATEST_GOOD_STEM, PRIMARY_SUFFIX),
            format!("{}{}", LATEST_GOOD_STEM, CHECKSUM_SUFFIX),
            format!("{}{}", LATEST_GOOD_STEM, PARTITION_TABLE_SUFFIX),
        ]
    }

    pub fn missing_required(&self) -> Vec<String> {
        self.required_names()
            .into_iter()
            .filter(|name| !self.dir.join(name).is_file())
            .collect()
    }

    /// File names, relative to `dir`, handed to the archiver: the required trio
    /// and whichever optional sidecars exist (dangling links are skipped).
    pub fn manifest(&self) -> Vec<String> {
        let mut names: Vec<String> = self.required_names().into_iter().collect();
        for name in self.optional_names() {
            let path = self.dir.join(&name);
            if fs::symlink_metadata(&path).is_ok() && path.exists() {
                names.push(name);
            }
        }
        names
    }
}

/// `X` for a file named `X.img.zst.gpg`.
pub fn artifact_stem(file_name: &str) -> Option<&str> {
    let stem = file_name.strip_suffix(PRIMARY_SUFFIX)?;
    if stem.is_empty() || stem == LATEST_GOOD_STEM {
        return None;
    }
    Some(stem)
}

/// Newest primary image in `dir` by modification time. Symlinks are not
/// primaries; equal times resolve to the smallest stem.
pub fn newest_in_dir(dir: &Path) -> io::Result<Option<ArtifactSet>> {
    let mut best: Option<ArtifactSet> = None;
    let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(stem) = artifact_stem(&name) else {
            continue;
        };
        let meta = match fs::symlink_metadata(entry.path()) {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified()?;
        let newer = best.as_ref().map_or(true, |b| modified > b.modified);
        if newer {
            best = Some(ArtifactSet {
                dir: dir.to_path_buf(),
                stem: stem.to_string(),
                modified,
            });
        }
    }
    Ok(best)
}
