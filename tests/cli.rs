use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

const REPO: &str = "ssh://backup@vault.invalid:2222/./images";

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let sandbox = Sandbox {
            dir: TempDir::new().expect("tempdir"),
        };
        fs::create_dir_all(sandbox.path("home")).expect("home");
        sandbox
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn runtime(&self, name: &str) -> PathBuf {
        self.path("run").join(name)
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    /// Fake ssh and borg. Every borg invocation is appended to `calls`.
    fn tools(&self, ssh_body: &str, borg_body: &str) {
        self.script("ssh", ssh_body);
        let calls = self.path("calls");
        self.script(
            "borg",
            &format!("echo \"$@\" >> '{}'\n{}", calls.display(), borg_body),
        );
    }

    fn calls(&self) -> String {
        fs::read_to_string(self.path("calls")).unwrap_or_default()
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_borgrelay"));
        cmd.args(args)
            .env_clear()
            .env("PATH", "/usr/bin:/bin")
            .env("HOME", self.path("home"))
            .env("BORGRELAY_SYSTEM_CONFIG", self.path("no-system.yaml"))
            .env("BORGRELAY_REPO_URL", REPO)
            .env("BORGRELAY_RUNTIME_DIR", self.path("run"))
            .env("BORGRELAY_LOG_FILE", self.path("state/borgrelay.log"))
            .env("BORGRELAY_KNOWN_HOSTS", self.path("home/known_hosts"))
            .env("BORGRELAY_AUTO_ACCEPT_HOSTKEY", "yes")
            .env("BORGRELAY_ARCHIVE_PREFIX", "testhost")
            .env("BORGRELAY_SSH_BIN", self.path("ssh"))
            .env("BORGRELAY_BORG_BIN", self.path("borg"));
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("run borgrelay")
    }

    fn log(&self) -> String {
        fs::read_to_string(self.path("state/borgrelay.log")).unwrap_or_default()
    }

    fn last_line(&self, name: &str) -> String {
        fs::read_to_string(self.runtime(name))
            .unwrap_or_default()
            .lines()
            .last()
            .unwrap_or("")
            .to_string()
    }

    fn wait_for_idle(&self) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while self.runtime("job.pid").exists() {
            assert!(Instant::now() < deadline, "worker did not finish");
            thread::sleep(Duration::from_millis(100));
        }
    }
}

fn write_artifacts(dir: &Path, stem: &str) {
    fs::create_dir_all(dir).expect("mkdir");
    for suffix in [".img.zst.gpg", ".img.zst.gpg.sha256", ".sfdisk"] {
        File::create(dir.join(format!("{stem}{suffix}"))).expect("artifact");
    }
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).to_string()
}

#[test]
fn unreachable_host_fails_test_and_leaves_job_status_alone() {
    let sb = Sandbox::new();
    sb.tools(
        "echo 'ssh: connect to host vault.invalid port 2222: Connection refused' >&2\nexit 255",
        "exit 2",
    );
    fs::create_dir_all(sb.path("run")).expect("run dir");
    let job_line = "2026-01-01 00:00:00 FINISHED: upload testhost-1 finished in 5s\n";
    fs::write(sb.runtime("job.status"), job_line).expect("job status");

    let out = sb.run(&["test"]);
    assert_eq!(out.status.code(), Some(4), "stdout: {}", stdout(&out));
    let conn = sb.last_line("conn.status");
    assert!(conn.contains("ERROR"), "{}", conn);
    assert!(conn.contains("unreachable"), "{}", conn);
    assert_eq!(
        fs::read_to_string(sb.runtime("job.status")).expect("job status"),
        job_line
    );
    assert!(sb.calls().is_empty());
    assert!(sb.log().contains("Connection refused"));
}

#[test]
fn upload_runs_worker_through_all_phases() {
    let sb = Sandbox::new();
    sb.tools("exit 0", "case \"$1\" in create) sleep 2 ;; esac\nexit 0");
    write_artifacts(&sb.path("media/usb/backup"), "disk-2026-03-01");
    let mut cmd = sb.command(&["upload"]);
    cmd.env("BORGRELAY_SEARCH_ROOTS", sb.path("media"));
    let out = cmd.output().expect("run upload");
    assert!(out.status.success(), "stdout: {}", stdout(&out));
    assert!(sb.runtime("job.pid").exists());

    sb.wait_for_idle();
    assert!(!sb.runtime("job.start").exists());
    let job = sb.last_line("job.status");
    assert!(job.contains("FINISHED: upload testhost-"), "{}", job);

    let log = sb.log();
    let locating = log.find("RUNNING: locating").expect("locating phase");
    let creating = log.find("RUNNING: creating archive").expect("create phase");
    let finished = log.find("FINISHED: upload").expect("finished");
    assert!(locating < creating && creating < finished, "{}", log);

    let calls = sb.calls();
    let order: Vec<&str> = calls.lines().filter_map(|l| l.split(' ').next()).collect();
    assert_eq!(order, vec!["info", "create", "prune", "compact"]);
    assert!(calls.contains("disk-2026-03-01.img.zst.gpg disk-2026-03-01.img.zst.gpg.sha256 disk-2026-03-01.sfdisk"));
    assert!(calls.contains("--glob-archives testhost-* --keep-last 3"));
}

#[test]
fn download_into_read_only_target_fails_preflight() {
    if nix::unistd::geteuid().is_root() {
        return;
    }
    let sb = Sandbox::new();
    sb.tools("exit 0", "exit 0");
    let target = sb.path("restore");
    fs::create_dir(&target).expect("mkdir");
    fs::set_permissions(&target, fs::Permissions::from_mode(0o555)).expect("chmod");

    let out = sb.run(&["download", "testhost-2026-03-01_10-00-00", "--target", target.to_str().expect("utf8")]);
    assert!(out.status.success(), "stdout: {}", stdout(&out));
    sb.wait_for_idle();
    fs::set_permissions(&target, fs::Permissions::from_mode(0o755)).expect("chmod");

    let job = sb.last_line("job.status");
    assert!(job.contains("FAILED"), "{}", job);
    assert!(job.contains("not writable"), "{}", job);
    assert!(!sb.calls().contains("extract"));
}

#[test]
fn download_into_missing_target_fails_preflight() {
    let sb = Sandbox::new();
    sb.tools("exit 0", "exit 0");
    let target = sb.path("nowhere");
    let out = sb.run(&["download", "testhost-2026-03-01_10-00-00", "--target", target.to_str().expect("utf8")]);
    assert!(out.status.success(), "stdout: {}", stdout(&out));
    sb.wait_for_idle();

    let job = sb.last_line("job.status");
    assert!(job.contains("FAILED"), "{}", job);
    assert!(job.contains("does not exist"), "{}", job);
    assert!(!sb.runtime("job.pid").exists());
    assert!(!sb.calls().contains("extract"));
}

#[test]
fn second_job_is_rejected_while_one_is_live() {
    let sb = Sandbox::new();
    sb.tools("exit 0", "exit 0");
    fs::create_dir_all(sb.path("run")).expect("run dir");
    let holder = format!("{}\n", std::process::id());
    fs::write(sb.runtime("job.pid"), &holder).expect("pid");

    let out = sb.run(&["upload"]);
    assert_eq!(out.status.code(), Some(3));
    assert_eq!(fs::read_to_string(sb.runtime("job.pid")).expect("pid"), holder);

    let out = sb.run(&["clear"]);
    assert_eq!(out.status.code(), Some(3));
    assert!(sb.runtime("job.pid").exists());

    let out = sb.run(&["status"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains(&format!("pid {}", std::process::id())));
    assert!(sb.calls().is_empty());
}

#[test]
fn stale_pid_file_is_cleared_by_status() {
    let sb = Sandbox::new();
    fs::create_dir_all(sb.path("run")).expect("run dir");
    let mut child = Command::new("true").spawn().expect("spawn");
    let dead = child.id();
    child.wait().expect("wait");
    fs::write(sb.runtime("job.pid"), format!("{}\n", dead)).expect("pid");

    let out = sb.run(&["status"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("running:    no"));
    assert!(!sb.runtime("job.pid").exists());

    let out = sb.run(&["stop"]);
    assert_eq!(out.status.code(), Some(7));
}

#[test]
fn missing_repository_url_is_a_config_error() {
    let sb = Sandbox::new();
    let mut cmd = sb.command(&["status"]);
    cmd.env_remove("BORGRELAY_REPO_URL");
    let out = cmd.output().expect("run");
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("borgrelay config"));
}

fn start_upload(sb: &Sandbox) {
    write_artifacts(&sb.path("media/usb/backup"), "disk-2026-03-01");
    let mut cmd = sb.command(&["upload"]);
    cmd.env("BORGRELAY_SEARCH_ROOTS", sb.path("media"));
    let out = cmd.output().expect("run upload");
    assert!(out.status.success(), "stdout: {}", stdout(&out));
}

#[test]
fn failed_prune_still_compacts_and_finishes_with_warnings() {
    let sb = Sandbox::new();
    sb.tools(
        "exit 0",
        "case \"$1\" in prune) echo 'Failed to create/acquire the lock /repo/lock.exclusive (timeout).' >&2; exit 2 ;; esac\nexit 0",
    );
    start_upload(&sb);
    sb.wait_for_idle();

    let job = sb.last_line("job.status");
    assert!(job.contains("FINISHED WITH WARNINGS"), "{}", job);
    assert!(job.contains("prune failed with exit code 2"), "{}", job);
    let calls = sb.calls();
    let order: Vec<&str> = calls.lines().filter_map(|l| l.split(' ').next()).collect();
    assert_eq!(order, vec!["info", "create", "prune", "compact"]);
}

#[test]
fn failed_create_skips_retention() {
    let sb = Sandbox::new();
    sb.tools(
        "exit 0",
        "case \"$1\" in create) echo 'Connection closed by remote host' >&2; exit 2 ;; esac\nexit 0",
    );
    start_upload(&sb);
    sb.wait_for_idle();

    let job = sb.last_line("job.status");
    assert!(job.contains("FAILED"), "{}", job);
    assert!(job.contains("create failed with exit code 2"), "{}", job);
    let calls = sb.calls();
    assert!(!calls.contains("prune"), "{}", calls);
    assert!(!calls.contains("compact"), "{}", calls);
}

#[test]
fn stop_ends_a_live_upload_as_stopped() {
    let sb = Sandbox::new();
    sb.tools("exit 0", "case \"$1\" in create) sleep 30 ;; esac\nexit 0");
    start_upload(&sb);
    let deadline = Instant::now() + Duration::from_secs(15);
    while !sb.last_line("job.status").contains("creating archive") {
        assert!(Instant::now() < deadline, "upload never reached create");
        thread::sleep(Duration::from_millis(100));
    }

    let out = sb.run(&["stop"]);
    assert!(out.status.success(), "stdout: {}", stdout(&out));
    assert!(stdout(&out).contains("stopped job"));
    assert!(!sb.runtime("job.pid").exists());
    let job = sb.last_line("job.status");
    assert!(job.contains("STOPPED"), "{}", job);
    let all = fs::read_to_string(sb.runtime("job.status")).expect("job status");
    assert!(!all.contains("FAILED"), "{}", all);
    assert!(!sb.log().contains("FAILED: upload"));
    let calls = sb.calls();
    assert!(calls.contains("break-lock"), "{}", calls);
    assert!(!calls.contains("prune"), "{}", calls);
}

#[test]
fn answers_ssh_askpass_from_the_key_passphrase_file() {
    let sb = Sandbox::new();
    let file = sb.path("ssh-key-passphrase");
    fs::write(&file, "correct horse\n").expect("write");
    let out = sb
        .command(&["Enter passphrase for key '/home/ana/.ssh/id_ed25519': "])
        .env("BORGRELAY_ASKPASS_FILE", &file)
        .output()
        .expect("run askpass");
    assert!(out.status.success());
    assert_eq!(stdout(&out), "correct horse\n");

    let out = sb
        .command(&["Enter passphrase: "])
        .env("BORGRELAY_ASKPASS_FILE", sb.path("missing"))
        .output()
        .expect("run askpass");
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
}
