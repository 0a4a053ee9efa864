//! Maps ssh and borg diagnostics to a small failure taxonomy. Rules are
//! checked in order and the first match wins.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    HostKey,
    Auth,
    Passphrase,
    LockTimeout,
    Unreachable,
    Unknown,
}

const RULES: [(Failure, &[&str]); 5] = [
    (
        Failure::HostKey,
        &[
            "host key verification failed",
            "remote host identification has changed",
            "no matching host key type",
            "host key for",
        ],
    ),
    (
        Failure::Auth,
        &[
            "permission denied (publickey",
            "permission denied, please try again",
            "too many authentication failures",
            "no supported authentication methods",
        ],
    ),
    (
        Failure::Passphrase,
        &[
            "passphrase supplied in",
            "incorrect passphrase",
            "bad passphrase",
            "enter passphrase for key",
            "passphrase is incorrect",
        ],
    ),
    (
        Failure::LockTimeout,
        &[
            "failed to create/acquire the lock",
            "lock.exclusive",
            "lock timeout",
            "locktimeout",
        ],
    ),
    (
        Failure::Unreachable,
        &[
            "connection refused",
            "could not resolve hostname",
            "no route to host",
            "connection timed out",
            "operation timed out",
            "network is unreachable",
            "connection closed by",
            "repository does not exist",
            "is not a valid repository",
        ],
    ),
];

pub fn classify(output: &str) -> Failure {
    let text = output.to_lowercase();
    for (failure, phrases) in RULES {
        if phrases.iter().any(|p| text.contains(p)) {
            return failure;
        }
    }
    Failure::Unknown
}

impl Failure {
    pub fn describe(&self) -> &'static str {
        match self {
            Failure::HostKey => "host key verification failed",
            Failure::Auth => "ssh authentication failed",
            Failure::Passphrase => "passphrase rejected",
            Failure::LockTimeout => "repository is locked",
            Failure::Unreachable => "repository unreachable",
            Failure::Unknown => "unknown error",
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Last non-empty line of tool output, shown next to the classified reason.
pub fn last_line(output: &str) -> &str {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}
