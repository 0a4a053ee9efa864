//! File-backed job and connectivity status plus the single-job liveness slot.
//!
//! Status files are append-only; the last line is the current status.

pub mod liveness;

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::util::oplog;
use crate::util::paths::ensure_private_dir;

pub use liveness::process_alive;
use liveness::parse_pid;

const JOB_STATUS_FILE: &str = "job.status";
const CONN_STATUS_FILE: &str = "conn.status";
const PID_FILE: &str = "job.pid";
const START_FILE: &str = "job.start";
const CLAIM_ATTEMPTS: usize = 3;
const IN_FLIGHT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTag {
    Running,
    Finished,
    FinishedWithWarnings,
    Failed,
    Stopped,
}

impl JobTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobTag::Running => "RUNNING",
            JobTag::Finished => "FINISHED",
            JobTag::FinishedWithWarnings => "FINISHED WITH WARNINGS",
            JobTag::Failed => "FAILED",
            JobTag::Stopped => "STOPPED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnTag {
    Ok,
    Warning,
    Error,
}

impl ConnTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnTag::Ok => "OK",
            ConnTag::Warning => "WARNING",
            ConnTag::Error => "ERROR",
        }
    }
}

/// Display class of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Success,
    InProgress,
    Neutral,
}

impl Severity {
    /// Decides on the status tag when the line carries one, so words in the
    /// free text (`locked by our running job`) cannot override it.
    pub fn of(line: &str) -> Severity {
        match status_tag(line) {
            Some(tag) => Severity::from_text(tag),
            None => Severity::from_text(line),
        }
    }

    fn from_text(text: &str) -> Severity {
        if text.contains("ERROR") || text.contains("FAILED") {
            Severity::Error
        } else if text.contains("WARNING")
            || text.to_lowercase().contains("lock")
            || text.contains("STOPPED")
        {
            Severity::Warning
        } else if text.contains("OK") || text.contains("FINISHED") {
            Severity::Success
        } else if text.contains("RUNNING") {
            Severity::InProgress
        } else {
            Severity::Neutral
        }
    }
}

const TAGS: [&str; 8] = [
    "RUNNING",
    "FINISHED WITH WARNINGS",
    "FINISHED",
    "FAILED",
    "STOPPED",
    "OK",
    "WARNING",
    "ERROR",
];

/// `TAG` of `[<date> <time> ]TAG: text`, when it is one of ours.
fn status_tag(line: &str) -> Option<&'static str> {
    let (head, _) = line.split_once(": ")?;
    let digits = |s: &str, sep: char| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == sep);
    let tag = match head.splitn(3, ' ').collect::<Vec<_>>()[..] {
        [date, time, rest] if digits(date, '-') && digits(time, ':') => rest,
        _ => head,
    };
    TAGS.iter().find(|t| **t == tag).copied()
}

#[derive(Debug, Clone)]
pub struct StatusStore {
    dir: PathBuf,
    log: Option<PathBuf>,
}

impl StatusStore {
    /// Store rooted at `dir`. Status updates are mirrored into `log` when set.
    pub fn new(dir: &Path, log: Option<&Path>) -> Self {
        StatusStore {
            dir: dir.to_path_buf(),
            log: log.map(Path::to_path_buf),
        }
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.join(PID_FILE)
    }

    fn start_path(&self) -> PathBuf {
        self.dir.join(START_FILE)
    }

    fn append_status(&self, file: &str, tag: &str, text: &str) -> Result<()> {
        ensure_private_dir(&self.dir)?;
        let path = self.dir.join(file);
        let line = format!("{} {}: {}", oplog::timestamp(), tag, text.replace('\n', " "));
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| RelayError::message(format!("open {}: {}", path.display(), e)))?;
        writeln!(f, "{}", line)
            .map_err(|e| RelayError::message(format!("write {}: {}", path.display(), e)))?;
        if let Some(log) = &self.log {
            let channel = if file == JOB_STATUS_FILE { "job" } else { "connection" };
            if let Err(err) = oplog::append(log, &format!("[{}] {}: {}", channel, tag, text)) {
                warn!(log = %log.display(), "cannot write operation log: {}", err);
            }
        }
        Ok(())
    }

    fn last_line(&self, file: &str) -> Option<String> {
        let contents = fs::read_to_string(self.dir.join(file)).ok()?;
        contents
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(str::to_string)
    }

    pub fn set_job_status(&self, tag: JobTag, text: &str) -> Result<()> {
        self.append_status(JOB_STATUS_FILE, tag.as_str(), text)
    }

    pub fn job_status(&self) -> Option<String> {
        self.last_line(JOB_STATUS_FILE)
    }

    pub fn set_conn_status(&self, tag: ConnTag, text: &str) -> Result<()> {
        self.append_status(CONN_STATUS_FILE, tag.as_str(), text)
    }

    pub fn conn_status(&self) -> Option<String> {
        self.last_line(CONN_STATUS_FILE)
    }

    fn read_pid(&self) -> io::Result<Option<u32>> {
        match fs::read_to_string(self.pid_path()) {
            Ok(text) => Ok(parse_pid(&text)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Pid of the live worker. A pid file that is unreadable, unparsable, or
    /// names a dead process is removed along with the start marker.
    pub fn running_pid(&self) -> Option<u32> {
        let path = self.pid_path();
        if !path.exists() {
            return None;
        }
        match self.read_pid() {
            Ok(Some(pid)) if process_alive(pid) => return Some(pid),
            Ok(None) if self.pid_file_is_fresh() => return None,
            Ok(pid) => debug!(?pid, "removing stale pid file"),
            Err(err) => debug!("removing unreadable pid file: {}", err),
        }
        self.remove_markers();
        None
    }

    pub fn is_job_running(&self) -> bool {
        self.running_pid().is_some()
    }

    /// Removes every status and liveness file. Refused while a job is live.
    pub fn clear_status(&self) -> Result<()> {
        if let Some(pid) = self.running_pid() {
            return Err(RelayError::JobAlreadyRunning(pid));
        }
        for name in [JOB_STATUS_FILE, CONN_STATUS_FILE, PID_FILE, START_FILE] {
            remove_if_present(&self.dir.join(name))?;
        }
        Ok(())
    }

    /// Takes the job slot for this process. The pid file is published with
    /// a hard link, so it never exists without a pid in it. Fails with
    /// `JobAlreadyRunning` while another live process holds the slot and
    /// with `SlotBusy` while a fresh pid file is unreadable; a stale holder
    /// is evicted.
    pub fn claim(&self) -> Result<()> {
        ensure_private_dir(&self.dir)?;
        let path = self.pid_path();
        for _ in 0..CLAIM_ATTEMPTS {
            let mut tmp = NamedTempFile::new_in(&self.dir)?;
            writeln!(tmp, "{}", std::process::id())?;
            let err = match tmp.persist_noclobber(&path) {
                Ok(_) => return Ok(()),
                Err(err) => err.error,
            };
            if err.kind() != io::ErrorKind::AlreadyExists {
                return Err(RelayError::message(format!(
                    "failed to lock {}: {}",
                    path.display(),
                    err
                )));
            }
            match self.read_pid()? {
                Some(pid) if process_alive(pid) => return Err(RelayError::JobAlreadyRunning(pid)),
                Some(pid) => {
                    debug!(pid, path = %path.display(), "evicting stale job slot");
                    // Only evict the holder we looked at; a racing claimer may have replaced it.
                    if self.holder() == Some(pid) {
                        remove_if_present(&path)?;
                    }
                }
                None if self.pid_file_is_fresh() => {
                    return Err(RelayError::SlotBusy(path.display().to_string()))
                }
                None => {
                    debug!(path = %path.display(), "evicting unreadable job slot");
                    remove_if_present(&path)?;
                }
            }
        }
        Err(RelayError::message(format!(
            "could not claim {} after {} attempts",
            path.display(),
            CLAIM_ATTEMPTS
        )))
    }

    /// An unparsable pid file younger than this may belong to a claim that
    /// is still being written by an older borgrelay.
    fn pid_file_is_fresh(&self) -> bool {
        fs::metadata(self.pid_path())
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .map_or(false, |age| age < IN_FLIGHT_GRACE)
    }

    /// Hands the slot to `pid` by atomically replacing the pid file.
    pub fn record_worker_pid(&self, pid: u32) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        writeln!(tmp, "{}", pid)?;
        tmp.persist(self.pid_path())
            .map_err(|e| RelayError::message(format!("write pid file: {}", e)))?;
        Ok(())
    }

    pub fn holder(&self) -> Option<u32> {
        self.read_pid().ok().flatten()
    }

    pub fn write_start(&self, epoch_secs: i64) -> Result<()> {
        fs::write(self.start_path(), format!("{}\n", epoch_secs))?;
        Ok(())
    }

    pub fn start_time(&self) -> Option<i64> {
        fs::read_to_string(self.start_path())
            .ok()
            .and_then(|t| t.trim().parse().ok())
    }

    /// Releases the slot if `pid` still holds it.
    pub fn release(&self, pid: u32) {
        if self.holder() == Some(pid) {
            self.remove_markers();
        }
    }

    pub fn remove_markers(&self) {
        for path in [self.pid_path(), self.start_path()] {
            if let Err(err) = remove_if_present(&path) {
                warn!(path = %path.display(), "cannot remove marker: {}", err);
            }
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(RelayError::message(format!(
            "remove {}: {}",
            path.display(),
            err
        ))),
    }
}
