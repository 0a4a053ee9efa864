//! Key passphrases for ssh. ssh runs `SSH_ASKPASS` with the prompt as its
//! only argument, so borgrelay itself is the askpass program: when started
//! with `BORGRELAY_ASKPASS_FILE` set it prints the first line of that file
//! and exits.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{RelayError, Result};

pub const FILE_ENV: &str = "BORGRELAY_ASKPASS_FILE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Askpass {
    pub program: PathBuf,
    pub file: PathBuf,
}

impl Askpass {
    /// Askpass setup for the passphrase in `file`, answered by this executable.
    pub fn for_file(file: &Path) -> Option<Self> {
        match env::current_exe() {
            Ok(program) => Some(Askpass {
                program,
                file: file.to_path_buf(),
            }),
            Err(err) => {
                warn!("cannot locate borgrelay for SSH_ASKPASS: {}", err);
                None
            }
        }
    }

    /// Environment for ssh, or for borg which hands it on to ssh.
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("SSH_ASKPASS".to_string(), self.program.display().to_string()),
            ("SSH_ASKPASS_REQUIRE".to_string(), "force".to_string()),
            (FILE_ENV.to_string(), self.file.display().to_string()),
        ]
    }
}

/// Passphrase file named by the environment when ssh started us as askpass.
pub fn requested() -> Option<PathBuf> {
    env::var_os(FILE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

pub fn answer(file: &Path) -> Result<String> {
    let text = fs::read_to_string(file)
        .map_err(|e| RelayError::message(format!("read {}: {}", file.display(), e)))?;
    let line = text.lines().next().unwrap_or("");
    if line.is_empty() {
        return Err(RelayError::PassphraseFailed(format!(
            "{} holds no passphrase",
            file.display()
        )));
    }
    Ok(line.to_string())
}
