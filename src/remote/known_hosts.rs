use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::error::{RelayError, Result};
use crate::remote::url::RepoUrl;
use crate::util::command::run_captured;
use crate::util::paths::ensure_private_dir;

/// Tokens to look up: the bracketed form, plus the bare host for port 22
/// because ssh records default-port hosts without brackets.
pub fn lookup_tokens(url: &RepoUrl) -> Vec<String> {
    let mut tokens = vec![url.known_hosts_token()];
    if url.port == Some(22) {
        tokens.push(url.host.clone());
    }
    tokens
}

/// Whether the host key is already trusted. `None` when `ssh-keygen` is not available.
pub fn is_known(known_hosts: &Path, url: &RepoUrl) -> Option<bool> {
    if !known_hosts.is_file() {
        return Some(false);
    }
    for token in lookup_tokens(url) {
        let mut cmd = Command::new("ssh-keygen");
        cmd.arg("-F").arg(&token).arg("-f").arg(known_hosts);
        match run_captured(&mut cmd) {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => return Some(true),
            Ok(_) => {}
            Err(err) => {
                debug!("known_hosts lookup skipped: {}", err);
                return None;
            }
        }
    }
    Some(false)
}

/// Fetches the remote host keys with `ssh-keyscan` and appends them to `known_hosts`.
pub fn trust_host(known_hosts: &Path, url: &RepoUrl, timeout_secs: u64) -> Result<usize> {
    let mut cmd = Command::new("ssh-keyscan");
    cmd.arg("-T").arg(timeout_secs.to_string());
    if let Some(port) = url.port {
        cmd.arg("-p").arg(port.to_string());
    }
    cmd.arg(&url.host);
    let out = run_captured(&mut cmd)?;
    let lines: Vec<&str> = out
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();
    if lines.is_empty() {
        return Err(RelayError::RepoUnreachable(format!(
            "ssh-keyscan returned no host keys for {}: {}",
            url.known_hosts_token(),
            out.stderr.trim()
        )));
    }
    if let Some(parent) = known_hosts.parent() {
        ensure_private_dir(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(known_hosts)
        .map_err(|e| RelayError::message(format!("open {}: {}", known_hosts.display(), e)))?;
    for line in &lines {
        writeln!(file, "{}", line)
            .map_err(|e| RelayError::message(format!("write {}: {}", known_hosts.display(), e)))?;
    }
    info!(host = %url.known_hosts_token(), keys = lines.len(), "trusted host keys");
    Ok(lines.len())
}
