use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use signal_hook::{
    consts::{SIGHUP, SIGINT, SIGTERM},
    flag,
    iterator::Signals,
};
use tracing::{error, warn};

use crate::status::{JobTag, StatusStore};
use crate::types::JobKind;
use crate::util::command::ChildTracker;

const TERMINATING: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

/// Watches for termination signals in the worker. On the first one the
/// running archiver is terminated, the job is marked stopped, the liveness
/// markers are released and the process exits with `128 + signal`.
///
/// The returned flag is raised as the signal arrives, before the archiver
/// is killed, so the worker can tell a stop from a failing step.
pub fn signal_handler(kind: JobKind, tracker: &ChildTracker, store: &StatusStore) -> Arc<AtomicBool> {
    let stopping = Arc::new(AtomicBool::new(false));
    for sig in TERMINATING {
        if let Err(err) = flag::register(sig, Arc::clone(&stopping)) {
            error!(sig, "cannot watch signal: {}", err);
        }
    }
    let mut signals = match Signals::new(TERMINATING) {
        Ok(signals) => signals,
        Err(err) => {
            error!("signal handler setup failed: {}", err);
            return stopping;
        }
    };
    let tracker = tracker.clone();
    let store = store.clone();
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let child = tracker.lock().ok().and_then(|slot| *slot);
            if let Some(pid) = child {
                if let Err(err) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    warn!(pid, "cannot terminate archiver: {}", err);
                }
            }
            let text = format!("{} stopped by signal {}", kind, sig);
            if let Err(err) = store.set_job_status(JobTag::Stopped, &text) {
                warn!("cannot record job status: {}", err);
            }
            store.release(std::process::id());
            std::process::exit(128 + sig);
        }
    });
    stopping
}
