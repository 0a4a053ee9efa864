use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Config(ConfigError),
    #[error("no backup source found: {0}")]
    NoSourceFound(String),
    #[error("ssh key {} is not readable", .0.display())]
    IdentityUnreadable(PathBuf),
    #[error("host key verification failed: {0}")]
    HostkeyMismatch(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("passphrase rejected: {0}")]
    PassphraseFailed(String),
    #[error("repository locked: {0}")]
    RepoLocked(String),
    #[error("repository unreachable: {0}")]
    RepoUnreachable(String),
    #[error("a job is already running (pid {0})")]
    JobAlreadyRunning(u32),
    #[error("another borgrelay is starting a job ({0})")]
    SlotBusy(String),
    #[error("no job is running")]
    NoJobRunning,
    #[error("preflight failed: {0}")]
    WorkerPreflightFailed(String),
    #[error("{step} failed with exit code {code}: {reason}")]
    WorkerExecutionFailed {
        step: String,
        code: i32,
        reason: String,
    },
    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing setting {0}; run `borgrelay config`")]
    Missing(String),
    #[error("invalid configuration: {0}; run `borgrelay config`")]
    Invalid(String),
    #[error("parse config: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    pub fn message(msg: impl Into<String>) -> Self {
        RelayError::Message(msg.into())
    }
}

impl From<ConfigError> for RelayError {
    fn from(err: ConfigError) -> Self {
        RelayError::Config(err)
    }
}
