use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::model::{ConfigFile, PassphraseSource, Retention, Settings, Timeouts};
use crate::error::{ConfigError, RelayError, Result};
use crate::remote::RepoUrl;
use crate::types::Lang;
use crate::util::paths::{config_dir, expand_tilde, home_dir, runtime_dir, state_dir};

pub const SYSTEM_CONFIG_FILE: &str = "/etc/borgrelay/config.yaml";
pub const CONFIG_FILE_NAME: &str = "config.yaml";
const DEFAULT_KEEP_LAST: u32 = 3;
const DEFAULT_SSH_CONNECT_TIMEOUT: u64 = 10;
const DEFAULT_LOCK_WAIT: u64 = 600;
const DEFAULT_PROBE_LOCK_WAIT: u64 = 5;
const DEFAULT_SOURCE_MARKER: &str = "backup";
const DEFAULT_SEARCH_ROOTS: [&str; 3] = ["/media", "/mnt", "/run/media"];
const DEFAULT_SEARCH_DEPTH: usize = 3;

/// Where settings come from, lowest priority first.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub system: Option<PathBuf>,
    pub local: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl ConfigSources {
    /// System file, user file (or `config_override`), then the process environment.
    pub fn from_process(config_override: Option<PathBuf>) -> Self {
        let env: HashMap<String, String> = env::vars().collect();
        let system = env
            .get("BORGRELAY_SYSTEM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_FILE));
        let local = config_override.unwrap_or_else(|| user_config_path(&env));
        ConfigSources {
            system: Some(system),
            local: Some(local),
            env,
        }
    }

    /// The worker gets every key through its environment and reads no files.
    pub fn env_only() -> Self {
        ConfigSources {
            system: None,
            local: None,
            env: env::vars().collect(),
        }
    }
}

pub fn user_config_path(env: &HashMap<String, String>) -> PathBuf {
    config_dir(env).join(CONFIG_FILE_NAME)
}

pub fn read_config_file(path: &Path) -> Result<Option<ConfigFile>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(RelayError::message(format!(
                "read config {}: {}",
                path.display(),
                err
            )))
        }
    };
    if contents
        .lines()
        .map(str::trim)
        .all(|l| l.is_empty() || l.starts_with('#'))
    {
        return Ok(Some(ConfigFile::default()));
    }
    let cfg: ConfigFile = serde_yaml::from_str(&contents)
        .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
    Ok(Some(cfg))
}

/// Merges all layers without resolving; the setup wizard starts from this.
pub fn load_layers(sources: &ConfigSources) -> Result<ConfigFile> {
    let mut merged = ConfigFile::default();
    for path in [&sources.system, &sources.local].into_iter().flatten() {
        if let Some(layer) = read_config_file(path)? {
            debug!(path = %path.display(), "loaded config layer");
            merged.merge(layer);
        }
    }
    merged.merge(env_layer(&sources.env)?);
    Ok(merged)
}

pub fn load_settings(sources: &ConfigSources) -> Result<Settings> {
    let merged = load_layers(sources)?;
    resolve(merged, &sources.env)
}

fn env_layer(env: &HashMap<String, String>) -> Result<ConfigFile> {
    let text = |key: &str| {
        env.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    Ok(ConfigFile {
        repo_url: text("BORGRELAY_REPO_URL"),
        source_dir: text("BORGRELAY_SOURCE_DIR"),
        ssh_key: text("BORGRELAY_SSH_KEY"),
        ssh_key_hint: text("BORGRELAY_SSH_KEY_HINT"),
        known_hosts: text("BORGRELAY_KNOWN_HOSTS"),
        passphrase_file: text("BORGRELAY_PASSPHRASE_FILE"),
        ssh_key_passphrase_file: text("BORGRELAY_SSH_KEY_PASSPHRASE_FILE"),
        log_file: text("BORGRELAY_LOG_FILE"),
        runtime_dir: text("BORGRELAY_RUNTIME_DIR"),
        prune_enabled: text("BORGRELAY_PRUNE")
            .map(|v| parse_bool("BORGRELAY_PRUNE", &v))
            .transpose()?,
        keep_last: text("BORGRELAY_KEEP_LAST")
            .map(|v| parse_number("BORGRELAY_KEEP_LAST", &v))
            .transpose()?,
        archive_prefix: text("BORGRELAY_ARCHIVE_PREFIX"),
        ssh_connect_timeout: text("BORGRELAY_SSH_CONNECT_TIMEOUT")
            .map(|v| parse_number("BORGRELAY_SSH_CONNECT_TIMEOUT", &v))
            .transpose()?,
        lock_wait: text("BORGRELAY_LOCK_WAIT")
            .map(|v| parse_number("BORGRELAY_LOCK_WAIT", &v))
            .transpose()?,
        probe_lock_wait: text("BORGRELAY_PROBE_LOCK_WAIT")
            .map(|v| parse_number("BORGRELAY_PROBE_LOCK_WAIT", &v))
            .transpose()?,
        auto_accept_hostkey: text("BORGRELAY_AUTO_ACCEPT_HOSTKEY")
            .map(|v| parse_bool("BORGRELAY_AUTO_ACCEPT_HOSTKEY", &v))
            .transpose()?,
        auto_test_ssh: text("BORGRELAY_AUTO_TEST_SSH")
            .map(|v| parse_bool("BORGRELAY_AUTO_TEST_SSH", &v))
            .transpose()?,
        auto_test_repo: text("BORGRELAY_AUTO_TEST_REPO")
            .map(|v| parse_bool("BORGRELAY_AUTO_TEST_REPO", &v))
            .transpose()?,
        lang: text("BORGRELAY_LANG"),
        borg_bin: text("BORGRELAY_BORG_BIN"),
        ssh_bin: text("BORGRELAY_SSH_BIN"),
        source_marker: text("BORGRELAY_SOURCE_MARKER"),
        search_roots: text("BORGRELAY_SEARCH_ROOTS").map(|v| {
            v.split(':')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }),
        search_depth: text("BORGRELAY_SEARCH_DEPTH")
            .map(|v| parse_number("BORGRELAY_SEARCH_DEPTH", &v))
            .transpose()?,
    })
}

pub fn parse_bool(key: &str, value: &str) -> std::result::Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" => Ok(true),
        "0" | "false" | "no" | "off" | "n" => Ok(false),
        _ => Err(ConfigError::Invalid(format!(
            "{} must be yes or no, got {:?}",
            key, value
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> std::result::Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| {
        ConfigError::Invalid(format!("{} must be a non-negative number, got {:?}", key, value))
    })
}

/// Expands `~` and insists on an absolute path, falling back to `default` otherwise.
fn absolute_or_default(key: &str, value: Option<&str>, home: &Path, default: PathBuf) -> PathBuf {
    match value {
        Some(value) => {
            let path = expand_tilde(value, home);
            if path.is_absolute() {
                path
            } else {
                warn!(
                    "{} {:?} is not absolute; using {}",
                    key,
                    value,
                    default.display()
                );
                default
            }
        }
        None => default,
    }
}

fn resolve(cfg: ConfigFile, env: &HashMap<String, String>) -> Result<Settings> {
    let home = home_dir(env);

    let repo_raw = cfg
        .repo_url
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::Missing("repoUrl".to_string()))?;
    let repo = RepoUrl::parse(repo_raw)?;

    let source_dir = match cfg.source_dir.as_deref() {
        Some(value) => {
            let path = expand_tilde(value, &home);
            if path.is_absolute() {
                Some(path)
            } else {
                warn!("sourceDir {:?} is not absolute; searching for a source instead", value);
                None
            }
        }
        None => None,
    };

    let ssh_key = match cfg.ssh_key.as_deref() {
        Some(value) => {
            let path = expand_tilde(value, &home);
            if !path.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "sshKey {:?} must be an absolute path",
                    value
                ))
                .into());
            }
            Some(path)
        }
        None => None,
    };

    let known_hosts = absolute_or_default(
        "knownHosts",
        cfg.known_hosts.as_deref(),
        &home,
        home.join(".ssh").join("known_hosts"),
    );
    if known_hosts.to_string_lossy().contains('"') {
        return Err(ConfigError::Invalid(format!(
            "knownHosts {} must not contain '\"'",
            known_hosts.display()
        ))
        .into());
    }
    let passphrase_file = absolute_or_default(
        "passphraseFile",
        cfg.passphrase_file.as_deref(),
        &home,
        config_dir(env).join("passphrase"),
    );
    let ssh_key_passphrase_file = absolute_or_default(
        "sshKeyPassphraseFile",
        cfg.ssh_key_passphrase_file.as_deref(),
        &home,
        config_dir(env).join("ssh-key-passphrase"),
    );
    let log_file = absolute_or_default(
        "logFile",
        cfg.log_file.as_deref(),
        &home,
        state_dir(env).join("borgrelay.log"),
    );
    let runtime = absolute_or_default(
        "runtimeDir",
        cfg.runtime_dir.as_deref(),
        &home,
        runtime_dir(env),
    );

    let passphrase = if passphrase_file.is_file() {
        PassphraseSource::File(passphrase_file.clone())
    } else if let Some(value) = env.get("BORG_PASSPHRASE").filter(|v| !v.is_empty()) {
        PassphraseSource::Inherited(value.clone())
    } else {
        PassphraseSource::None
    };

    let keep_last = cfg.keep_last.unwrap_or(DEFAULT_KEEP_LAST);
    if keep_last == 0 {
        return Err(ConfigError::Invalid("keepLast must be at least 1".to_string()).into());
    }

    let lang = match cfg.lang.as_deref() {
        Some(value) => Lang::parse(value).map_err(ConfigError::Invalid)?,
        None => Lang::default(),
    };

    let archive_prefix = match cfg.archive_prefix {
        Some(prefix) => {
            let prefix = prefix.trim().to_string();
            if prefix.is_empty()
                || !prefix
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            {
                return Err(ConfigError::Invalid(format!(
                    "archivePrefix {:?} must use only letters, digits, '.', '-', '_'",
                    prefix
                ))
                .into());
            }
            prefix
        }
        None => default_archive_prefix(),
    };

    let search_roots = cfg
        .search_roots
        .unwrap_or_else(|| DEFAULT_SEARCH_ROOTS.iter().map(|s| s.to_string()).collect())
        .iter()
        .map(|root| expand_tilde(root, &home))
        .filter(|root| root.is_absolute())
        .collect();

    Ok(Settings {
        repo,
        source_dir,
        ssh_key,
        ssh_key_hint: cfg.ssh_key_hint.filter(|h| !h.trim().is_empty()),
        known_hosts,
        passphrase_file,
        passphrase,
        ssh_key_passphrase_file,
        log_file,
        runtime_dir: runtime,
        retention: Retention {
            enabled: cfg.prune_enabled.unwrap_or(true),
            keep_last,
        },
        archive_prefix,
        timeouts: Timeouts {
            ssh_connect: cfg.ssh_connect_timeout.unwrap_or(DEFAULT_SSH_CONNECT_TIMEOUT),
            lock_wait: cfg.lock_wait.unwrap_or(DEFAULT_LOCK_WAIT),
            probe_lock_wait: cfg.probe_lock_wait.unwrap_or(DEFAULT_PROBE_LOCK_WAIT),
        },
        auto_accept_hostkey: cfg.auto_accept_hostkey.unwrap_or(false),
        auto_test_ssh: cfg.auto_test_ssh.unwrap_or(true),
        auto_test_repo: cfg.auto_test_repo.unwrap_or(false),
        lang,
        borg_bin: cfg.borg_bin.unwrap_or_else(|| "borg".to_string()),
        ssh_bin: cfg.ssh_bin.unwrap_or_else(|| "ssh".to_string()),
        source_marker: cfg
            .source_marker
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE_MARKER.to_string()),
        search_roots,
        search_depth: cfg.search_depth.unwrap_or(DEFAULT_SEARCH_DEPTH),
        home,
    })
}

fn default_archive_prefix() -> String {
    let name = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();
    let cleaned: String = name
        .split('.')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn env_with_home(home: &Path) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("HOME".to_string(), home.display().to_string());
        env
    }

    fn yaml_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn later_layers_win() {
        let home = TempDir::new().expect("tempdir");
        let system = yaml_file(
            "repoUrl: \"ssh://sys@host/repo\"\nkeepLast: 7\nlang: de\nsshKeyHint: sys\n",
        );
        let local = yaml_file("repoUrl: \"ssh://me@host:2222/./repo\"\nkeepLast: 4\n");
        let mut env = env_with_home(home.path());
        env.insert("BORGRELAY_KEEP_LAST".to_string(), "2".to_string());
        let sources = ConfigSources {
            system: Some(system.path().to_path_buf()),
            local: Some(local.path().to_path_buf()),
            env,
        };
        let settings = load_settings(&sources).expect("load");
        assert_eq!(settings.repo.user, "me");
        assert_eq!(settings.repo.port, Some(2222));
        assert_eq!(settings.retention.keep_last, 2);
        assert_eq!(settings.lang, Lang::De);
        assert_eq!(settings.ssh_key_hint.as_deref(), Some("sys"));
    }

    #[test]
    fn defaults_and_tilde_expansion() {
        let home = TempDir::new().expect("tempdir");
        let local = yaml_file(
            "repoUrl: ssh://me@host/repo\nknownHosts: \"~/kh\"\nlogFile: relative.log\nsourceDir: \"~/images\"\n",
        );
        let sources = ConfigSources {
            system: None,
            local: Some(local.path().to_path_buf()),
            env: env_with_home(home.path()),
        };
        let settings = load_settings(&sources).expect("load");
        assert_eq!(settings.known_hosts, home.path().join("kh"));
        assert_eq!(
            settings.log_file,
            home.path().join(".local/state/borgrelay/borgrelay.log")
        );
        assert_eq!(settings.source_dir, Some(home.path().join("images")));
        assert_eq!(settings.timeouts.lock_wait, 600);
        assert_eq!(settings.timeouts.probe_lock_wait, 5);
        assert!(settings.retention.enabled);
        assert!(!settings.auto_accept_hostkey);
        assert_eq!(settings.passphrase, PassphraseSource::None);
        assert_eq!(
            settings.ssh_key_passphrase_file,
            home.path().join(".config/borgrelay/ssh-key-passphrase")
        );
    }

    #[test]
    fn known_hosts_with_spaces_is_accepted_but_quotes_are_not() {
        let home = TempDir::new().expect("tempdir");
        let mut env = env_with_home(home.path());
        env.insert("BORGRELAY_REPO_URL".to_string(), "ssh://u@h/r".to_string());
        env.insert(
            "BORGRELAY_KNOWN_HOSTS".to_string(),
            "/srv/ssh state/known_hosts".to_string(),
        );
        let settings = load_settings(&ConfigSources {
            env: env.clone(),
            ..ConfigSources::default()
        })
        .expect("load");
        assert_eq!(settings.known_hosts, PathBuf::from("/srv/ssh state/known_hosts"));

        env.insert(
            "BORGRELAY_KNOWN_HOSTS".to_string(),
            "/srv/\"odd\"/known_hosts".to_string(),
        );
        assert!(matches!(
            load_settings(&ConfigSources {
                env,
                ..ConfigSources::default()
            }),
            Err(RelayError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn missing_repo_url_is_config_missing() {
        let home = TempDir::new().expect("tempdir");
        let sources = ConfigSources {
            system: Some(home.path().join("absent.yaml")),
            local: None,
            env: env_with_home(home.path()),
        };
        match load_settings(&sources) {
            Err(RelayError::Config(ConfigError::Missing(key))) => assert_eq!(key, "repoUrl"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_repo_url_is_config_invalid() {
        let home = TempDir::new().expect("tempdir");
        let mut env = env_with_home(home.path());
        env.insert("BORGRELAY_REPO_URL".to_string(), "host:/repo".to_string());
        let sources = ConfigSources {
            env,
            ..ConfigSources::default()
        };
        assert!(matches!(
            load_settings(&sources),
            Err(RelayError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn bad_env_values_are_rejected() {
        let home = TempDir::new().expect("tempdir");
        let mut env = env_with_home(home.path());
        env.insert("BORGRELAY_REPO_URL".to_string(), "ssh://u@h/r".to_string());
        env.insert("BORGRELAY_PRUNE".to_string(), "maybe".to_string());
        let sources = ConfigSources {
            env,
            ..ConfigSources::default()
        };
        assert!(matches!(
            load_settings(&sources),
            Err(RelayError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn passphrase_file_beats_inherited_variable() {
        let home = TempDir::new().expect("tempdir");
        let pass = home.path().join("pass");
        let mut env = env_with_home(home.path());
        env.insert("BORGRELAY_REPO_URL".to_string(), "ssh://u@h/r".to_string());
        env.insert(
            "BORGRELAY_PASSPHRASE_FILE".to_string(),
            pass.display().to_string(),
        );
        env.insert("BORG_PASSPHRASE".to_string(), "from-env".to_string());
        let sources = ConfigSources {
            env: env.clone(),
            ..ConfigSources::default()
        };
        let settings = load_settings(&sources).expect("load");
        assert_eq!(
            settings.passphrase,
            PassphraseSource::Inherited("from-env".to_string())
        );
        fs::write(&pass, "secret\n").expect("write");
        let settings = load_settings(&sources).expect("load");
        assert_eq!(settings.passphrase, PassphraseSource::File(pass));
    }

    #[test]
    fn env_pairs_reload_to_the_same_settings() {
        let home = TempDir::new().expect("tempdir");
        let mut env = env_with_home(home.path());
        env.insert("BORGRELAY_REPO_URL".to_string(), "ssh://u@h:23/r".to_string());
        env.insert("BORGRELAY_SOURCE_DIR".to_string(), "/media/backup".to_string());
        env.insert("BORGRELAY_SEARCH_ROOTS".to_string(), "/a:/b".to_string());
        env.insert("BORGRELAY_ARCHIVE_PREFIX".to_string(), "ws".to_string());
        let first = load_settings(&ConfigSources {
            env,
            ..ConfigSources::default()
        })
        .expect("load");
        let mut worker_env = env_with_home(home.path());
        worker_env.extend(first.env_pairs());
        let second = load_settings(&ConfigSources {
            env: worker_env,
            ..ConfigSources::default()
        })
        .expect("reload");
        assert_eq!(second.repo, first.repo);
        assert_eq!(second.source_dir, first.source_dir);
        assert_eq!(second.search_roots, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(second.runtime_dir, first.runtime_dir);
        assert_eq!(second.retention, first.retention);
        assert_eq!(second.timeouts, first.timeouts);
        assert_eq!(second.archive_prefix, "ws");
    }
}
