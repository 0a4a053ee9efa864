//! The detached worker: runs the archiver phases for one job and reports
//! progress through the job status file.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::Builder;
use tracing::{debug, info, warn};

use crate::borg::classify::{classify, last_line};
use crate::borg::BorgContext;
use crate::config::{load_settings, ConfigSources, Settings};
use crate::error::{RelayError, Result};
use crate::remote::resolve_key;
use crate::signal_handler::signal_handler;
use crate::source::artifacts::newest_in_dir;
use crate::source::{locate_source, ArtifactSet};
use crate::status::{JobTag, StatusStore};
use crate::types::{ArchiveName, JobKind};
use crate::util::command::{command_line, run_tracked, Captured, ChildTracker};
use crate::util::oplog;

#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub kind: JobKind,
    pub archive: ArchiveName,
    pub source: Option<PathBuf>,
    pub target: Option<PathBuf>,
}

/// Holds the job slot for the worker's lifetime.
struct SlotGuard {
    store: StatusStore,
    pid: u32,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.store.release(self.pid);
    }
}

/// Entry point of `borgrelay worker ...`. Settings come from the environment
/// prepared by the foreground process.
pub fn run_worker(request: &WorkerRequest) -> Result<()> {
    let settings = load_settings(&ConfigSources::env_only())?;
    let store = StatusStore::new(&settings.runtime_dir, Some(&settings.log_file));
    let pid = std::process::id();
    store.record_worker_pid(pid)?;
    let _slot = SlotGuard {
        store: store.clone(),
        pid,
    };
    let tracker: ChildTracker = Arc::new(Mutex::new(None));
    let stopping = signal_handler(request.kind, &tracker, &store);
    info!(pid, kind = %request.kind, archive = %request.archive, "worker running");

    let started = Instant::now();
    let result = resolve_key(&settings).and_then(|key| {
        let worker = Worker {
            settings: &settings,
            store: &store,
            tracker: &tracker,
            borg: BorgContext::new(&settings, key.as_deref()),
        };
        match request.kind {
            JobKind::Upload => worker.upload(&request.archive, request.source.as_deref()),
            JobKind::Download => {
                let target = request.target.as_deref().unwrap_or(Path::new("."));
                worker.download(&request.archive, target).map(|()| Vec::new())
            }
        }
    });
    let took = format_duration(started.elapsed());
    let label = format!("{} {}", request.kind, request.archive);
    match final_status(&label, &took, &result, stopping.load(Ordering::SeqCst)) {
        Some((tag, text)) => store.set_job_status(tag, &text)?,
        None => await_signal_exit(),
    }
    result.map(drop)
}

const SIGNAL_EXIT_WAIT: Duration = Duration::from_secs(10);

/// The signal thread records STOPPED and exits the process; give it the chance.
fn await_signal_exit() {
    debug!("stop requested; leaving the final status to the signal handler");
    thread::sleep(SIGNAL_EXIT_WAIT);
}

/// Last status line for a finished job, or none when a stop signal arrived
/// and the run ended because its archiver was killed.
fn final_status(
    label: &str,
    took: &str,
    result: &Result<Vec<String>>,
    stopping: bool,
) -> Option<(JobTag, String)> {
    if stopping {
        return None;
    }
    Some(match result {
        Ok(warnings) if warnings.is_empty() => {
            (JobTag::Finished, format!("{} finished in {}", label, took))
        }
        Ok(warnings) => (
            JobTag::FinishedWithWarnings,
            format!("{} finished in {}; {}", label, took, warnings.join("; ")),
        ),
        Err(err) => (JobTag::Failed, format!("{}: {}", label, err)),
    })
}

struct Worker<'a> {
    settings: &'a Settings,
    store: &'a StatusStore,
    tracker: &'a ChildTracker,
    borg: BorgContext,
}

impl Worker<'_> {
    fn phase(&self, text: &str) -> Result<()> {
        debug!("{}", text);
        self.store.set_job_status(JobTag::Running, text)
    }

    fn run_step(&self, step: &str, mut cmd: Command) -> Result<Captured> {
        let cmdline = command_line(&cmd);
        let out = run_tracked(&mut cmd, Some(self.tracker))?;
        if let Err(err) =
            oplog::append_command(&self.settings.log_file, &cmdline, out.code, &out.combined())
        {
            warn!("cannot write operation log: {}", err);
        }
        if out.success() {
            return Ok(out);
        }
        let text = out.combined();
        Err(RelayError::WorkerExecutionFailed {
            step: step.to_string(),
            code: out.code,
            reason: format!("{}: {}", classify(&text), last_line(&text)),
        })
    }

    fn locate(&self, source: Option<&Path>) -> Result<ArtifactSet> {
        let found = match source {
            Some(dir) => newest_in_dir(dir)
                .map_err(|e| RelayError::message(format!("scan {}: {}", dir.display(), e)))?
                .ok_or_else(|| RelayError::NoSourceFound(format!("no backup image in {}", dir.display()))),
            None => locate_source(self.settings),
        };
        found.map_err(|err| match err {
            RelayError::NoSourceFound(msg) => RelayError::WorkerPreflightFailed(msg),
            other => other,
        })
    }

    /// Returns the warnings of the best-effort retention phases.
    fn upload(&self, archive: &ArchiveName, source: Option<&Path>) -> Result<Vec<String>> {
        self.phase("locating latest backup image")?;
        let set = self.locate(source)?;

        self.phase(&format!("verifying artifacts of {} in {}", set.stem, set.dir.display()))?;
        let missing = set.missing_required();
        if !missing.is_empty() {
            return Err(RelayError::WorkerPreflightFailed(format!(
                "missing {} in {}",
                missing.join(", "),
                set.dir.display()
            )));
        }
        let files = set.manifest();

        self.phase(&format!("creating archive {} ({} files)", archive, files.len()))?;
        self.run_step("create", self.borg.create(archive, &set.dir, &files))?;

        let mut warnings = Vec::new();
        let retention = self.settings.retention;
        if retention.enabled {
            self.phase(&format!(
                "pruning {}-* archives, keeping the last {}",
                self.settings.archive_prefix, retention.keep_last
            ))?;
            if let Err(err) = self.run_step(
                "prune",
                self.borg.prune(&self.settings.archive_prefix, retention.keep_last),
            ) {
                warn!("{}", err);
                warnings.push(err.to_string());
            }
        }
        self.phase("compacting repository")?;
        if let Err(err) = self.run_step("compact", self.borg.compact()) {
            warn!("{}", err);
            warnings.push(err.to_string());
        }
        Ok(warnings)
    }

    fn download(&self, archive: &ArchiveName, target: &Path) -> Result<()> {
        self.phase(&format!("checking target {}", target.display()))?;
        check_target(target)?;
        self.phase(&format!("extracting {} into {}", archive, target.display()))?;
        self.run_step("extract", self.borg.extract(archive, target))?;
        Ok(())
    }
}

/// The target must be an existing directory we can create files in.
pub fn check_target(target: &Path) -> Result<()> {
    if !target.exists() {
        return Err(RelayError::WorkerPreflightFailed(format!(
            "target {} does not exist",
            target.display()
        )));
    }
    if !target.is_dir() {
        return Err(RelayError::WorkerPreflightFailed(format!(
            "target {} is not a directory",
            target.display()
        )));
    }
    Builder::new()
        .prefix(".borgrelay-write-test")
        .tempfile_in(target)
        .map(drop)
        .map_err(|e| {
            RelayError::WorkerPreflightFailed(format!(
                "target {} is not writable: {}",
                target.display(),
                e
            ))
        })
}

pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn stop_signal_suppresses_the_final_status() {
        let failed: Result<Vec<String>> = Err(RelayError::WorkerExecutionFailed {
            step: "create".to_string(),
            code: 143,
            reason: "terminated".to_string(),
        });
        assert_eq!(final_status("upload a-1", "3s", &failed, true), None);
        let (tag, text) = final_status("upload a-1", "3s", &failed, false).expect("status");
        assert_eq!(tag, JobTag::Failed);
        assert!(text.starts_with("upload a-1: "), "{}", text);

        let warned: Result<Vec<String>> = Ok(vec!["prune failed".to_string()]);
        assert_eq!(
            final_status("upload a-1", "3s", &warned, false),
            Some((
                JobTag::FinishedWithWarnings,
                "upload a-1 finished in 3s; prune failed".to_string()
            ))
        );
        assert_eq!(
            final_status("upload a-1", "3s", &Ok(Vec::new()), false).map(|(tag, _)| tag),
            Some(JobTag::Finished)
        );
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(format_duration(Duration::from_secs(7)), "7s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 02m 03s");
    }

    #[test]
    fn target_checks() {
        let dir = TempDir::new().expect("tempdir");
        assert!(check_target(dir.path()).is_ok());
        assert_eq!(fs::read_dir(dir.path()).expect("ls").count(), 0);

        let missing = dir.path().join("nope");
        match check_target(&missing) {
            Err(RelayError::WorkerPreflightFailed(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("unexpected {:?}", other),
        }

        let file = dir.path().join("file");
        fs::write(&file, b"x").expect("write");
        assert!(matches!(
            check_target(&file),
            Err(RelayError::WorkerPreflightFailed(_))
        ));
    }

    #[test]
    fn read_only_target_is_rejected() {
        if nix::unistd::geteuid().is_root() {
            return;
        }
        let dir = TempDir::new().expect("tempdir");
        let ro = dir.path().join("ro");
        fs::create_dir(&ro).expect("mkdir");
        fs::set_permissions(&ro, fs::Permissions::from_mode(0o555)).expect("chmod");
        let result = check_target(&ro);
        fs::set_permissions(&ro, fs::Permissions::from_mode(0o755)).expect("chmod");
        match result {
            Err(RelayError::WorkerPreflightFailed(msg)) => assert!(msg.contains("not writable")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
