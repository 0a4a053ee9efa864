use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::{RelayError, Result};

/// Pid of the subprocess currently running on behalf of a worker, if any.
pub type ChildTracker = Arc<Mutex<Option<u32>>>;

#[derive(Debug, Clone)]
pub struct Captured {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stdout followed by stderr, the text the failure classifier looks at.
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        out.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') && !self.stderr.is_empty() {
            out.push('\n');
        }
        out.push_str(&self.stderr);
        out
    }
}

pub fn command_line(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy();
    let args: Vec<String> = cmd
        .get_args()
        .map(|a| a.to_string_lossy().to_string())
        .collect();
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

pub fn run_captured(cmd: &mut Command) -> Result<Captured> {
    run_tracked(cmd, None)
}

/// Runs `cmd` to completion with stdin closed, capturing its output. While it
/// runs, its pid is published through `tracker` so a signal handler can stop it.
pub fn run_tracked(cmd: &mut Command, tracker: Option<&ChildTracker>) -> Result<Captured> {
    debug!(command = %command_line(cmd), "running");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let child = cmd.spawn().map_err(|e| {
        RelayError::message(format!("{}: {}", cmd.get_program().to_string_lossy(), e))
    })?;
    if let Some(tracker) = tracker {
        if let Ok(mut slot) = tracker.lock() {
            *slot = Some(child.id());
        }
    }
    let output = child.wait_with_output();
    if let Some(tracker) = tracker {
        if let Ok(mut slot) = tracker.lock() {
            *slot = None;
        }
    }
    let output = output.map_err(|e| {
        RelayError::message(format!("{}: {}", cmd.get_program().to_string_lossy(), e))
    })?;
    Ok(Captured {
        code: output.status.code().unwrap_or(1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_exit_code_and_both_streams() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2; exit 3");
        let captured = run_captured(&mut cmd).expect("run sh");
        assert_eq!(captured.code, 3);
        assert!(!captured.success());
        assert_eq!(captured.combined(), "out\nerr\n");
    }

    #[test]
    fn tracker_is_cleared_after_exit() {
        let tracker: ChildTracker = Arc::new(Mutex::new(None));
        let mut cmd = Command::new("true");
        run_tracked(&mut cmd, Some(&tracker)).expect("run true");
        assert!(tracker.lock().unwrap().is_none());
    }

    #[test]
    fn command_line_joins_args() {
        let mut cmd = Command::new("borg");
        cmd.arg("list").arg("--short");
        assert_eq!(command_line(&cmd), "borg list --short");
    }
}
