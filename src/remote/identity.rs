//! Picks the private key handed to ssh, or none to let ssh use its agent and
//! default identities.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{RelayError, Result};
use crate::util::paths::{expand_tilde, is_readable_file};

const CONVENTIONAL_KEYS: [&str; 3] = ["id_rsa", "id_ecdsa", "id_dsa"];

pub fn resolve_identity(
    explicit: Option<&Path>,
    hint: Option<&str>,
    home: &Path,
) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if is_readable_file(path) {
            debug!(key = %path.display(), "using configured ssh key");
            return Ok(Some(path.to_path_buf()));
        }
        return Err(RelayError::IdentityUnreadable(path.to_path_buf()));
    }
    let hint = hint.map(str::trim).filter(|h| !h.is_empty());
    let ssh_dir = home.join(".ssh");

    let from_config = config_identity_files(&ssh_dir.join("config"), home);
    if let Some(path) = pick_preferred(usable(from_config), hint) {
        debug!(key = %path.display(), "using ssh key from ssh config");
        return Ok(Some(path));
    }

    let conventional = conventional_identity_files(&ssh_dir, hint);
    if let Some(path) = pick_preferred(usable(conventional), hint) {
        debug!(key = %path.display(), "using ssh key from ~/.ssh");
        return Ok(Some(path));
    }
    debug!("no ssh key found; deferring to ssh defaults");
    Ok(None)
}

/// `IdentityFile` directives from an ssh client config, in file order.
pub fn config_identity_files(config: &Path, home: &Path) -> Vec<PathBuf> {
    let Ok(contents) = fs::read_to_string(config) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once(|c: char| c == '=' || c.is_whitespace()) {
            Some((key, value)) => (key.trim(), value.trim().trim_start_matches('=').trim()),
            None => continue,
        };
        if !key.eq_ignore_ascii_case("IdentityFile") || value.is_empty() {
            continue;
        }
        let value = value.trim_matches('"');
        let value = value.replace("%d", &home.to_string_lossy());
        out.push(expand_tilde(&value, home));
    }
    out
}

fn conventional_identity_files(ssh_dir: &Path, hint: Option<&str>) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(ssh_dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();

    let mut out = Vec::new();
    for name in names.iter().filter(|n| n.starts_with("id_ed25519")) {
        out.push(ssh_dir.join(name));
    }
    for name in CONVENTIONAL_KEYS {
        if names.iter().any(|n| n == name) {
            out.push(ssh_dir.join(name));
        }
    }
    if let Some(hint) = hint {
        for name in names.iter().filter(|n| n.contains(hint)) {
            let path = ssh_dir.join(name);
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}

fn usable(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths
        .into_iter()
        .filter(|p| !is_public_key(p) && is_readable_file(p))
        .collect()
}

fn is_public_key(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "pub")
}

fn is_ed25519(path: &Path) -> bool {
    if path.to_string_lossy().contains("ed25519") {
        return true;
    }
    let mut public = path.as_os_str().to_owned();
    public.push(".pub");
    fs::read_to_string(PathBuf::from(public))
        .map(|text| text.trim_start().starts_with("ssh-ed25519"))
        .unwrap_or(false)
}

/// Hint match, then Ed25519, then the first candidate.
fn pick_preferred(candidates: Vec<PathBuf>, hint: Option<&str>) -> Option<PathBuf> {
    if let Some(hint) = hint {
        if let Some(path) = candidates
            .iter()
            .find(|p| p.to_string_lossy().contains(hint))
        {
            return Some(path.clone());
        }
    }
    if let Some(path) = candidates.iter().find(|p| is_ed25519(p)) {
        return Some(path.clone());
    }
    candidates.into_iter().next()
}
