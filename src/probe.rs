//! Connectivity prober: ssh authentication first, then a short-lock-wait
//! `borg info`. Results go to the connectivity status only.

use std::path::Path;

use tracing::{info, warn};

use crate::borg::classify::{classify, last_line, Failure};
use crate::borg::BorgContext;
use crate::config::Settings;
use crate::error::{RelayError, Result};
use crate::remote::{known_hosts, SshOptions};
use crate::status::{ConnTag, StatusStore};
use crate::util::command::{command_line, run_captured, Captured};
use crate::util::oplog;

/// ssh exits with 255 when it failed itself rather than the remote command.
const SSH_ERROR_EXIT: i32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    NotTested,
    AuthOk,
    Reachable,
    ReachableSelfBusy,
    LockedByOther,
    AuthFailed,
    HostkeyFailed,
    PassphraseFailed,
    Unreachable,
    Unknown,
}

impl ConnState {
    pub fn tag(&self) -> ConnTag {
        match self {
            ConnState::NotTested
            | ConnState::AuthOk
            | ConnState::Reachable
            | ConnState::ReachableSelfBusy => ConnTag::Ok,
            ConnState::LockedByOther => ConnTag::Warning,
            _ => ConnTag::Error,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ConnState::NotTested => "not tested",
            ConnState::AuthOk => "ssh authentication OK",
            ConnState::Reachable => "repository reachable",
            ConnState::ReachableSelfBusy => "repository reachable, locked by our running job",
            ConnState::LockedByOther => "repository locked by another process, try later",
            ConnState::AuthFailed => "ssh authentication failed",
            ConnState::HostkeyFailed => "host key verification failed",
            ConnState::PassphraseFailed => "passphrase rejected",
            ConnState::Unreachable => "repository unreachable",
            ConnState::Unknown => "unknown error",
        }
    }

    /// Lock contention is informational; only hard failures gate actions.
    pub fn permits_actions(&self) -> bool {
        self.tag() != ConnTag::Error
    }

    fn from_failure(failure: Failure, job_running: bool) -> ConnState {
        match failure {
            Failure::HostKey => ConnState::HostkeyFailed,
            Failure::Auth => ConnState::AuthFailed,
            Failure::Passphrase => ConnState::PassphraseFailed,
            Failure::LockTimeout if job_running => ConnState::ReachableSelfBusy,
            Failure::LockTimeout => ConnState::LockedByOther,
            Failure::Unreachable => ConnState::Unreachable,
            Failure::Unknown => ConnState::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub state: ConnState,
    pub detail: String,
}

impl ProbeOutcome {
    fn new(state: ConnState, detail: impl Into<String>) -> Self {
        ProbeOutcome {
            state,
            detail: detail.into(),
        }
    }

    pub fn line(&self) -> String {
        if self.detail.is_empty() {
            self.state.describe().to_string()
        } else {
            format!("{} ({})", self.state.describe(), self.detail)
        }
    }

    /// Turns a gating failure into the matching error.
    pub fn gate(&self) -> Result<()> {
        let line = self.line();
        match self.state {
            ConnState::HostkeyFailed => Err(RelayError::HostkeyMismatch(line)),
            ConnState::AuthFailed => Err(RelayError::AuthFailed(line)),
            ConnState::PassphraseFailed => Err(RelayError::PassphraseFailed(line)),
            ConnState::Unreachable | ConnState::Unknown => Err(RelayError::RepoUnreachable(line)),
            _ => Ok(()),
        }
    }
}

/// Result of `ssh ... -T user@host exit`. A remote that refuses the `exit`
/// command (forced `borg serve`) still proves authentication worked.
pub fn interpret_ssh(out: &Captured) -> ProbeOutcome {
    if out.success() {
        return ProbeOutcome::new(ConnState::AuthOk, "");
    }
    let text = out.combined();
    match classify(&text) {
        Failure::Unknown if out.code != SSH_ERROR_EXIT => ProbeOutcome::new(ConnState::AuthOk, ""),
        Failure::LockTimeout => ProbeOutcome::new(ConnState::AuthOk, ""),
        failure => ProbeOutcome::new(ConnState::from_failure(failure, false), last_line(&text)),
    }
}

/// Result of `borg info` with the probe lock wait.
pub fn interpret_repo(out: &Captured, job_running: bool) -> ProbeOutcome {
    if out.success() {
        return ProbeOutcome::new(ConnState::Reachable, "");
    }
    let text = out.combined();
    let state = ConnState::from_failure(classify(&text), job_running);
    let detail = match state {
        ConnState::ReachableSelfBusy | ConnState::LockedByOther => String::new(),
        _ => last_line(&text).to_string(),
    };
    ProbeOutcome::new(state, detail)
}

pub struct Prober<'a> {
    settings: &'a Settings,
    key: Option<&'a Path>,
    store: &'a StatusStore,
}

impl<'a> Prober<'a> {
    pub fn new(settings: &'a Settings, key: Option<&'a Path>, store: &'a StatusStore) -> Self {
        Prober {
            settings,
            key,
            store,
        }
    }

    fn log(&self, cmdline: &str, out: &Captured) {
        if let Err(err) =
            oplog::append_command(&self.settings.log_file, cmdline, out.code, &out.combined())
        {
            warn!("cannot write operation log: {}", err);
        }
    }

    fn record(&self, outcome: &ProbeOutcome) -> Result<()> {
        info!(state = ?outcome.state, "connectivity probe");
        self.store.set_conn_status(outcome.state.tag(), &outcome.line())
    }

    fn ssh_stage(&self) -> Result<ProbeOutcome> {
        let url = &self.settings.repo;
        if !self.settings.auto_accept_hostkey {
            if let Some(false) = known_hosts::is_known(&self.settings.known_hosts, url) {
                return Ok(ProbeOutcome::new(
                    ConnState::HostkeyFailed,
                    format!(
                        "{} is not in {}; run `borgrelay config` to trust it",
                        url.known_hosts_token(),
                        self.settings.known_hosts.display()
                    ),
                ));
            }
        }
        let mut cmd = SshOptions::for_settings(self.settings, self.key).auth_check(&url.destination());
        let out = run_captured(&mut cmd)?;
        self.log(&command_line(&cmd), &out);
        Ok(interpret_ssh(&out))
    }

    /// SSH authentication only.
    pub fn probe_ssh(&self) -> Result<ProbeOutcome> {
        let outcome = self.ssh_stage()?;
        self.record(&outcome)?;
        Ok(outcome)
    }

    /// SSH authentication, then the repository itself.
    pub fn probe_full(&self) -> Result<ProbeOutcome> {
        let outcome = self.ssh_stage()?;
        if outcome.state != ConnState::AuthOk {
            self.record(&outcome)?;
            return Ok(outcome);
        }
        let borg = BorgContext::new(self.settings, self.key)
            .with_lock_wait(self.settings.timeouts.probe_lock_wait);
        let mut cmd = borg.info();
        let out = run_captured(&mut cmd)?;
        self.log(&command_line(&cmd), &out);
        let outcome = interpret_repo(&out, self.store.is_job_running());
        self.record(&outcome)?;
        Ok(outcome)
    }
}
