use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tracing::{info, warn};

use crate::borg::BorgContext;
use crate::config::Settings;
use crate::error::{RelayError, Result};
use crate::remote::resolve_key;
use crate::status::{process_alive, JobTag, StatusStore};
use crate::util::command::{command_line, run_captured};
use crate::util::oplog;

const TERM_GRACE: Duration = Duration::from_secs(10);
const KILL_GRACE: Duration = Duration::from_secs(2);
const POLL: Duration = Duration::from_millis(200);

/// Signals the worker's process group. Falls back to the worker alone when
/// it is not a group leader.
fn signal_worker(pid: u32, signal: Signal) -> Result<()> {
    let pid = Pid::from_raw(pid as i32);
    match killpg(pid, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => {
            warn!(%pid, "killpg failed: {}; signalling the worker only", err);
            match kill(pid, signal) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(err) => {
                    return Err(RelayError::message(format!(
                        "cannot signal worker {}: {}",
                        pid, err
                    )))
                }
            }
        }
    }
    Ok(())
}

fn wait_gone(pid: u32, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        thread::sleep(POLL);
    }
    !process_alive(pid)
}

/// Terminates the running job, clears its markers and releases the
/// repository lock it may have left behind. Returns the stopped pid.
pub fn stop_job(settings: &Settings, store: &StatusStore) -> Result<u32> {
    let pid = store.running_pid().ok_or(RelayError::NoJobRunning)?;
    info!(pid, "stopping job");
    signal_worker(pid, Signal::SIGTERM)?;
    if !wait_gone(pid, TERM_GRACE) {
        warn!(pid, "worker ignored SIGTERM; sending SIGKILL");
        signal_worker(pid, Signal::SIGKILL)?;
        if !wait_gone(pid, KILL_GRACE) {
            return Err(RelayError::message(format!(
                "worker {} is still running after SIGKILL",
                pid
            )));
        }
    }
    store.remove_markers();
    let recorded = store
        .job_status()
        .map(|line| line.contains(JobTag::Stopped.as_str()))
        .unwrap_or(false);
    if !recorded {
        store.set_job_status(JobTag::Stopped, "stopped by user")?;
    }
    break_lock(settings);
    Ok(pid)
}

fn break_lock(settings: &Settings) {
    let key = match resolve_key(settings) {
        Ok(key) => key,
        Err(err) => {
            warn!("skipping break-lock: {}", err);
            return;
        }
    };
    let mut cmd = BorgContext::new(settings, key.as_deref()).break_lock();
    match run_captured(&mut cmd) {
        Ok(out) => {
            if let Err(err) =
                oplog::append_command(&settings.log_file, &command_line(&cmd), out.code, &out.combined())
            {
                warn!("cannot write operation log: {}", err);
            }
            if !out.success() {
                warn!(code = out.code, "break-lock failed");
            }
        }
        Err(err) => warn!("break-lock failed: {}", err),
    }
}
