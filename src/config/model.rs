use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::remote::RepoUrl;
use crate::types::Lang;

/// One configuration layer as stored on disk. Every key is optional; layers
/// are merged with later layers winning.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_passphrase_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_last: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_connect_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_wait: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_lock_wait: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_accept_hostkey: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_test_ssh: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_test_repo: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub borg_bin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_bin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_roots: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_depth: Option<usize>,
}

macro_rules! merge_fields {
    ($dst:ident, $src:ident, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field;
            }
        )+
    };
}

impl ConfigFile {
    /// Overlays every key set in `upper` onto `self`.
    pub fn merge(&mut self, upper: ConfigFile) {
        merge_fields!(
            self,
            upper,
            repo_url,
            source_dir,
            ssh_key,
            ssh_key_hint,
            known_hosts,
            passphrase_file,
            ssh_key_passphrase_file,
            log_file,
            runtime_dir,
            prune_enabled,
            keep_last,
            archive_prefix,
            ssh_connect_timeout,
            lock_wait,
            probe_lock_wait,
            auto_accept_hostkey,
            auto_test_ssh,
            auto_test_repo,
            lang,
            borg_bin,
            ssh_bin,
            source_marker,
            search_roots,
            search_depth,
        );
    }
}

/// How the archiver obtains the repository passphrase.
#[derive(Clone, PartialEq, Eq)]
pub enum PassphraseSource {
    File(PathBuf),
    Inherited(String),
    None,
}

impl fmt::Debug for PassphraseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassphraseSource::File(path) => write!(f, "File({})", path.display()),
            PassphraseSource::Inherited(_) => f.write_str("Inherited(<redacted>)"),
            PassphraseSource::None => f.write_str("None"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub enabled: bool,
    pub keep_last: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub ssh_connect: u64,
    pub lock_wait: u64,
    pub probe_lock_wait: u64,
}

/// Fully resolved settings for one process run. Never mutated after load.
#[derive(Debug, Clone)]
pub struct Settings {
    pub repo: RepoUrl,
    pub source_dir: Option<PathBuf>,
    pub ssh_key: Option<PathBuf>,
    pub ssh_key_hint: Option<String>,
    pub known_hosts: PathBuf,
    pub passphrase_file: PathBuf,
    pub passphrase: PassphraseSource,
    /// Unlocks an encrypted ssh key; unused while the file does not exist.
    pub ssh_key_passphrase_file: PathBuf,
    pub log_file: PathBuf,
    pub runtime_dir: PathBuf,
    pub retention: Retention,
    pub archive_prefix: String,
    pub timeouts: Timeouts,
    pub auto_accept_hostkey: bool,
    pub auto_test_ssh: bool,
    pub auto_test_repo: bool,
    pub lang: Lang,
    pub borg_bin: String,
    pub ssh_bin: String,
    pub source_marker: String,
    pub search_roots: Vec<PathBuf>,
    pub search_depth: usize,
    pub home: PathBuf,
}

impl Settings {
    /// Every resolved key as `BORGRELAY_*` variables, the form the worker loads from.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        let bool_str = |b: bool| if b { "yes" } else { "no" }.to_string();
        let path_str = |p: &PathBuf| p.display().to_string();
        let mut pairs = vec![
            ("BORGRELAY_REPO_URL", self.repo.as_str().to_string()),
            ("BORGRELAY_KNOWN_HOSTS", path_str(&self.known_hosts)),
            ("BORGRELAY_PASSPHRASE_FILE", path_str(&self.passphrase_file)),
            (
                "BORGRELAY_SSH_KEY_PASSPHRASE_FILE",
                path_str(&self.ssh_key_passphrase_file),
            ),
            ("BORGRELAY_LOG_FILE", path_str(&self.log_file)),
            ("BORGRELAY_RUNTIME_DIR", path_str(&self.runtime_dir)),
            ("BORGRELAY_PRUNE", bool_str(self.retention.enabled)),
            ("BORGRELAY_KEEP_LAST", self.retention.keep_last.to_string()),
            ("BORGRELAY_ARCHIVE_PREFIX", self.archive_prefix.clone()),
            (
                "BORGRELAY_SSH_CONNECT_TIMEOUT",
                self.timeouts.ssh_connect.to_string(),
            ),
            ("BORGRELAY_LOCK_WAIT", self.timeouts.lock_wait.to_string()),
            (
                "BORGRELAY_PROBE_LOCK_WAIT",
                self.timeouts.probe_lock_wait.to_string(),
            ),
            (
                "BORGRELAY_AUTO_ACCEPT_HOSTKEY",
                bool_str(self.auto_accept_hostkey),
            ),
            ("BORGRELAY_AUTO_TEST_SSH", bool_str(self.auto_test_ssh)),
            ("BORGRELAY_AUTO_TEST_REPO", bool_str(self.auto_test_repo)),
            ("BORGRELAY_LANG", self.lang.as_str().to_string()),
            ("BORGRELAY_BORG_BIN", self.borg_bin.clone()),
            ("BORGRELAY_SSH_BIN", self.ssh_bin.clone()),
            ("BORGRELAY_SOURCE_MARKER", self.source_marker.clone()),
            (
                "BORGRELAY_SEARCH_ROOTS",
                self.search_roots
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(":"),
            ),
            ("BORGRELAY_SEARCH_DEPTH", self.search_depth.to_string()),
        ];
        if let Some(dir) = &self.source_dir {
            pairs.push(("BORGRELAY_SOURCE_DIR", path_str(dir)));
        }
        if let Some(key) = &self.ssh_key {
            pairs.push(("BORGRELAY_SSH_KEY", path_str(key)));
        }
        if let Some(hint) = &self.ssh_key_hint {
            pairs.push(("BORGRELAY_SSH_KEY_HINT", hint.clone()));
        }
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    pub fn ssh_dir(&self) -> PathBuf {
        self.home.join(".ssh")
    }
}
