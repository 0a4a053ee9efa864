pub mod classify;

use std::path::Path;
use std::process::Command;

use crate::config::{PassphraseSource, Settings};
use crate::remote::{shell_quote, RepoUrl, SshOptions};
use crate::types::ArchiveName;

/// Everything needed to run the archiver against the configured repository.
#[derive(Debug, Clone)]
pub struct BorgContext {
    pub bin: String,
    pub repo: RepoUrl,
    pub rsh: String,
    /// Environment the remote shell needs, such as askpass for a key passphrase.
    pub rsh_env: Vec<(String, String)>,
    pub passphrase: PassphraseSource,
    pub lock_wait: u64,
}

impl BorgContext {
    pub fn new(settings: &Settings, key: Option<&Path>) -> Self {
        let ssh = SshOptions::for_settings(settings, key);
        BorgContext {
            bin: settings.borg_bin.clone(),
            repo: settings.repo.clone(),
            rsh: ssh.rsh(),
            rsh_env: ssh.env(),
            passphrase: settings.passphrase.clone(),
            lock_wait: settings.timeouts.lock_wait,
        }
    }

    /// Same context with a different lock wait, used by the short probe.
    pub fn with_lock_wait(&self, secs: u64) -> Self {
        BorgContext {
            lock_wait: secs,
            ..self.clone()
        }
    }

    fn base(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg(subcommand);
        cmd.env("BORG_RSH", &self.rsh);
        cmd.envs(self.rsh_env.iter().map(|(k, v)| (k, v)));
        match &self.passphrase {
            PassphraseSource::File(path) => {
                cmd.env(
                    "BORG_PASSCOMMAND",
                    format!("cat {}", shell_quote(&path.display().to_string())),
                );
                cmd.env_remove("BORG_PASSPHRASE");
            }
            PassphraseSource::Inherited(value) => {
                cmd.env("BORG_PASSPHRASE", value);
            }
            PassphraseSource::None => {}
        }
        cmd
    }

    fn locked(&self, subcommand: &str) -> Command {
        let mut cmd = self.base(subcommand);
        cmd.arg("--lock-wait").arg(self.lock_wait.to_string());
        cmd
    }

    fn archive_ref(&self, archive: &ArchiveName) -> String {
        format!("{}::{}", self.repo.as_str(), archive)
    }

    /// `borg create` run from `source_dir` so the archive stores bare file names.
    pub fn create(&self, archive: &ArchiveName, source_dir: &Path, files: &[String]) -> Command {
        let mut cmd = self.locked("create");
        cmd.arg("--stats").arg(self.archive_ref(archive));
        cmd.args(files);
        cmd.current_dir(source_dir);
        cmd
    }

    pub fn extract(&self, archive: &ArchiveName, target: &Path) -> Command {
        let mut cmd = self.locked("extract");
        cmd.arg(self.archive_ref(archive));
        cmd.current_dir(target);
        cmd
    }

    pub fn prune(&self, prefix: &str, keep_last: u32) -> Command {
        let mut cmd = self.locked("prune");
        cmd.arg("--glob-archives")
            .arg(format!("{}-*", prefix))
            .arg("--keep-last")
            .arg(keep_last.to_string())
            .arg(self.repo.as_str());
        cmd
    }

    pub fn compact(&self) -> Command {
        let mut cmd = self.locked("compact");
        cmd.arg(self.repo.as_str());
        cmd
    }

    pub fn info(&self) -> Command {
        let mut cmd = self.locked("info");
        cmd.arg(self.repo.as_str());
        cmd
    }

    pub fn list(&self) -> Command {
        let mut cmd = self.locked("list");
        cmd.arg("--short").arg(self.repo.as_str());
        cmd
    }

    pub fn delete(&self, archive: &ArchiveName) -> Command {
        let mut cmd = self.locked("delete");
        cmd.arg(self.archive_ref(archive));
        cmd
    }

    pub fn break_lock(&self) -> Command {
        let mut cmd = self.base("break-lock");
        cmd.arg(self.repo.as_str());
        cmd
    }
}

/// Parses `borg list --short` output, oldest first as borg prints it.
pub fn parse_archive_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Archive names for uploads: `<prefix>-<local time>`.
pub fn archive_name_for(prefix: &str, now: chrono::DateTime<chrono::Local>) -> String {
    format!("{}-{}", prefix, now.format("%Y-%m-%d_%H-%M-%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::ffi::OsStr;
    use std::path::PathBuf;

    fn context(passphrase: PassphraseSource) -> BorgContext {
        BorgContext {
            bin: "borg".to_string(),
            repo: RepoUrl::parse("ssh://backup@vault:2222/./images").expect("url"),
            rsh: "ssh -o BatchMode=yes".to_string(),
            rsh_env: Vec::new(),
            passphrase,
            lock_wait: 600,
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect()
    }

    fn env_of<'a>(cmd: &'a Command, key: &str) -> Option<Option<&'a OsStr>> {
        cmd.get_envs()
            .find(|(k, _)| *k == OsStr::new(key))
            .map(|(_, v)| v)
    }

    #[test]
    fn create_passes_manifest_relative_to_source() {
        let ctx = context(PassphraseSource::File(PathBuf::from("/home/u/.config/borgrelay/passphrase")));
        let archive: ArchiveName = "host-2026-01-02_03-04-05".parse().expect("name");
        let files = vec!["X.img.zst.gpg".to_string(), "X.sfdisk".to_string()];
        let cmd = ctx.create(&archive, Path::new("/media/usb/backup"), &files);
        assert_eq!(
            args(&cmd),
            vec![
                "create",
                "--lock-wait",
                "600",
                "--stats",
                "ssh://backup@vault:2222/./images::host-2026-01-02_03-04-05",
                "X.img.zst.gpg",
                "X.sfdisk",
            ]
        );
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/media/usb/backup")));
        assert_eq!(
            env_of(&cmd, "BORG_PASSCOMMAND"),
            Some(Some(OsStr::new("cat /home/u/.config/borgrelay/passphrase")))
        );
        assert_eq!(env_of(&cmd, "BORG_RSH"), Some(Some(OsStr::new("ssh -o BatchMode=yes"))));
    }

    #[test]
    fn prune_uses_prefix_glob_and_probe_lock_wait_is_separate() {
        let ctx = context(PassphraseSource::Inherited("secret".to_string()));
        assert_eq!(
            args(&ctx.prune("host", 3)),
            vec![
                "prune",
                "--lock-wait",
                "600",
                "--glob-archives",
                "host-*",
                "--keep-last",
                "3",
                "ssh://backup@vault:2222/./images",
            ]
        );
        let probe = ctx.with_lock_wait(5);
        assert_eq!(args(&probe.info())[..3], ["info", "--lock-wait", "5"]);
        assert_eq!(
            env_of(&probe.info(), "BORG_PASSPHRASE"),
            Some(Some(OsStr::new("secret")))
        );
        assert_eq!(args(&ctx.break_lock()), vec!["break-lock", "ssh://backup@vault:2222/./images"]);
    }

    #[test]
    fn remote_shell_environment_reaches_every_command() {
        let ctx = BorgContext {
            rsh_env: vec![
                ("SSH_ASKPASS".to_string(), "/usr/bin/borgrelay".to_string()),
                ("SSH_ASKPASS_REQUIRE".to_string(), "force".to_string()),
            ],
            ..context(PassphraseSource::None)
        };
        for cmd in [ctx.info(), ctx.break_lock(), ctx.compact()] {
            assert_eq!(
                env_of(&cmd, "SSH_ASKPASS_REQUIRE"),
                Some(Some(OsStr::new("force")))
            );
        }
    }

    #[test]
    fn archive_names_and_listing() {
        let now = chrono::Local
            .with_ymd_and_hms(2026, 3, 9, 14, 5, 7)
            .single()
            .expect("time");
        assert_eq!(archive_name_for("laptop", now), "laptop-2026-03-09_14-05-07");
        assert_eq!(
            parse_archive_list("a-1\n\n  a-2  \n"),
            vec!["a-1".to_string(), "a-2".to_string()]
        );
    }
}
