//! Starting jobs: the foreground claims the single job slot, launches a
//! detached worker in its own session, and returns once the worker holds
//! the slot.

pub mod stop;
pub mod worker;

use std::collections::HashMap;
use std::env;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::borg::archive_name_for;
use crate::config::{PassphraseSource, Settings};
use crate::error::{RelayError, Result};
use crate::source::ArtifactSet;
use crate::status::{JobTag, StatusStore};
use crate::types::{ArchiveName, JobKind};

const HANDOFF_TIMEOUT: Duration = Duration::from_secs(3);
const HANDOFF_POLL: Duration = Duration::from_millis(50);
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub pid: u32,
    pub kind: JobKind,
    pub archive: ArchiveName,
}

/// Environment for the worker. Nothing from the parent is inherited except
/// what is listed here.
pub fn worker_env(
    settings: &Settings,
    key: Option<&Path>,
    ambient: &HashMap<String, String>,
) -> Vec<(String, String)> {
    let mut out = vec![
        (
            "PATH".to_string(),
            ambient
                .get("PATH")
                .cloned()
                .unwrap_or_else(|| DEFAULT_PATH.to_string()),
        ),
        ("HOME".to_string(), settings.home.display().to_string()),
    ];
    for name in ["USER", "LOGNAME"] {
        if let Some(value) = ambient.get(name) {
            out.push((name.to_string(), value.clone()));
        }
    }
    if key.is_none() {
        if let Some(sock) = ambient.get("SSH_AUTH_SOCK") {
            out.push(("SSH_AUTH_SOCK".to_string(), sock.clone()));
        }
    }
    if let PassphraseSource::Inherited(value) = &settings.passphrase {
        out.push(("BORG_PASSPHRASE".to_string(), value.clone()));
    }
    out.extend(
        settings
            .env_pairs()
            .into_iter()
            .filter(|(name, _)| name != "BORGRELAY_SSH_KEY"),
    );
    if let Some(key) = key {
        out.push(("BORGRELAY_SSH_KEY".to_string(), key.display().to_string()));
    }
    out
}

pub fn start_upload(
    settings: &Settings,
    key: Option<&Path>,
    store: &StatusStore,
    source: &ArtifactSet,
) -> Result<Started> {
    let name = archive_name_for(&settings.archive_prefix, Local::now());
    let archive: ArchiveName = name
        .parse()
        .map_err(|e: String| RelayError::message(format!("archive name: {}", e)))?;
    let args = vec![
        "worker".to_string(),
        JobKind::Upload.as_str().to_string(),
        "--archive".to_string(),
        archive.to_string(),
        "--source".to_string(),
        source.dir.display().to_string(),
    ];
    let summary = format!("starting upload of {} as {}", source.stem, archive);
    launch(settings, key, store, JobKind::Upload, archive, args, &summary)
}

pub fn start_download(
    settings: &Settings,
    key: Option<&Path>,
    store: &StatusStore,
    archive: &ArchiveName,
    target: &Path,
) -> Result<Started> {
    let target = absolute(target)?;
    let args = vec![
        "worker".to_string(),
        JobKind::Download.as_str().to_string(),
        "--archive".to_string(),
        archive.to_string(),
        "--target".to_string(),
        target.display().to_string(),
    ];
    let summary = format!("starting download of {} into {}", archive, target.display());
    launch(
        settings,
        key,
        store,
        JobKind::Download,
        archive.clone(),
        args,
        &summary,
    )
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

fn launch(
    settings: &Settings,
    key: Option<&Path>,
    store: &StatusStore,
    kind: JobKind,
    archive: ArchiveName,
    args: Vec<String>,
    summary: &str,
) -> Result<Started> {
    store.claim()?;
    let me = std::process::id();
    let result = spawn_worker(settings, key, store, &args, summary);
    match result {
        Ok(pid) => {
            info!(pid, kind = %kind, archive = %archive, "worker started");
            Ok(Started { pid, kind, archive })
        }
        Err(err) => {
            store.release(me);
            if let Err(status_err) = store.set_job_status(JobTag::Failed, &format!("{}: {}", kind, err)) {
                warn!("cannot record job status: {}", status_err);
            }
            Err(err)
        }
    }
}

fn spawn_worker(
    settings: &Settings,
    key: Option<&Path>,
    store: &StatusStore,
    args: &[String],
    summary: &str,
) -> Result<u32> {
    store.write_start(Local::now().timestamp())?;
    store.set_job_status(JobTag::Running, summary)?;
    let exe = env::current_exe()?;
    let ambient: HashMap<String, String> = env::vars().collect();
    let mut cmd = Command::new(&exe);
    cmd.args(args)
        .env_clear()
        .envs(worker_env(settings, key, &ambient))
        .current_dir("/")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    // New session: the worker outlives the terminal that started it.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(io::Error::from)?;
            Ok(())
        });
    }
    debug!(exe = %exe.display(), ?args, "spawning worker");
    let mut child = cmd
        .spawn()
        .map_err(|e| RelayError::message(format!("spawn worker {}: {}", exe.display(), e)))?;
    wait_for_handoff(store, &mut child)?;
    Ok(child.id())
}

/// Waits until the worker has replaced our pid in the slot with its own, or
/// has already finished and released it.
fn wait_for_handoff(store: &StatusStore, child: &mut Child) -> Result<()> {
    let deadline = Instant::now() + HANDOFF_TIMEOUT;
    let me = std::process::id();
    loop {
        match store.holder() {
            Some(pid) if pid == child.id() => return Ok(()),
            None => return Ok(()),
            _ => {}
        }
        if let Some(status) = child.try_wait()? {
            if store.holder() != Some(me) {
                return Ok(());
            }
            return Err(RelayError::message(format!(
                "worker exited before starting ({})",
                status
            )));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(RelayError::message(
                "worker did not start within 3 seconds".to_string(),
            ));
        }
        thread::sleep(HANDOFF_POLL);
    }
}
