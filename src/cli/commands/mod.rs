pub mod archives;
pub mod jobs;
pub mod setup;
pub mod transfer;
pub mod worker;

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use crate::config::{load_settings, ConfigSources, Settings};
use crate::error::{RelayError, Result};
use crate::remote::resolve_key;
use crate::status::StatusStore;

/// Settings and status store for one foreground run.
pub struct Context {
    pub settings: Settings,
    pub store: StatusStore,
}

impl Context {
    pub fn load(config: Option<&Path>) -> Result<Self> {
        let settings = load_settings(&ConfigSources::from_process(config.map(Path::to_path_buf)))?;
        let store = StatusStore::new(&settings.runtime_dir, Some(&settings.log_file));
        Ok(Context { settings, store })
    }

    pub fn key(&self) -> Result<Option<PathBuf>> {
        resolve_key(&self.settings)
    }
}

pub fn exit_code(err: &RelayError) -> i32 {
    match err {
        RelayError::Config(_) => 2,
        RelayError::JobAlreadyRunning(_) | RelayError::SlotBusy(_) => 3,
        RelayError::HostkeyMismatch(_)
        | RelayError::AuthFailed(_)
        | RelayError::PassphraseFailed(_)
        | RelayError::RepoUnreachable(_) => 4,
        RelayError::NoSourceFound(_) => 5,
        RelayError::IdentityUnreadable(_) => 6,
        RelayError::NoJobRunning => 7,
        RelayError::WorkerExecutionFailed { code, .. } if *code != 0 => *code,
        _ => 1,
    }
}

pub fn exit_for_error(err: &RelayError) -> ! {
    eprintln!("borgrelay: {}", err);
    std::process::exit(exit_code(err));
}

/// Reads one trimmed line from stdin after printing `question`. `None` on EOF.
pub fn ask(question: &str) -> Result<Option<String>> {
    let mut out = io::stdout();
    write!(out, "{}", question)?;
    out.flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

pub fn interactive() -> bool {
    io::stdin().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(exit_code(&ConfigError::Missing("repoUrl".into()).into()), 2);
        assert_eq!(exit_code(&RelayError::JobAlreadyRunning(10)), 3);
        assert_eq!(exit_code(&RelayError::SlotBusy("/run/job.pid".into())), 3);
        assert_eq!(exit_code(&RelayError::AuthFailed("x".into())), 4);
        assert_eq!(exit_code(&RelayError::RepoUnreachable("x".into())), 4);
        assert_eq!(exit_code(&RelayError::NoSourceFound("x".into())), 5);
        assert_eq!(exit_code(&RelayError::IdentityUnreadable("/k".into())), 6);
        assert_eq!(exit_code(&RelayError::NoJobRunning), 7);
        let failed = RelayError::WorkerExecutionFailed {
            step: "list".into(),
            code: 2,
            reason: "unknown error".into(),
        };
        assert_eq!(exit_code(&failed), 2);
        assert_eq!(exit_code(&RelayError::RepoLocked("x".into())), 1);
    }
}
