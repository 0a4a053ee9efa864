use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::Builder;

use crate::error::{RelayError, Result};

pub const APP_DIR: &str = "borgrelay";

pub fn home_dir(env: &HashMap<String, String>) -> PathBuf {
    env.get("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Expands a leading `~` or `~/` to `home`. `~user` forms are left alone.
pub fn expand_tilde(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn xdg_dir(env: &HashMap<String, String>, var: &str, fallback: &[&str]) -> PathBuf {
    if let Some(dir) = env.get(var).filter(|d| Path::new(d.as_str()).is_absolute()) {
        return PathBuf::from(dir);
    }
    let mut path = home_dir(env);
    for part in fallback {
        path.push(part);
    }
    path
}

pub fn config_dir(env: &HashMap<String, String>) -> PathBuf {
    xdg_dir(env, "XDG_CONFIG_HOME", &[".config"]).join(APP_DIR)
}

pub fn state_dir(env: &HashMap<String, String>) -> PathBuf {
    xdg_dir(env, "XDG_STATE_HOME", &[".local", "state"]).join(APP_DIR)
}

pub fn runtime_dir(env: &HashMap<String, String>) -> PathBuf {
    if let Some(dir) = env
        .get("XDG_RUNTIME_DIR")
        .filter(|d| Path::new(d.as_str()).is_absolute())
    {
        return Path::new(dir).join(APP_DIR);
    }
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, nix::unistd::getuid()))
}

pub fn ensure_private_dir(path: &Path) -> Result<()> {
    if path.exists() {
        let meta = fs::metadata(path)
            .map_err(|e| RelayError::message(format!("stat {}: {}", path.display(), e)))?;
        if !meta.is_dir() {
            return Err(RelayError::message(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        return Ok(());
    }
    fs::create_dir_all(path)
        .map_err(|e| RelayError::message(format!("create {}: {}", path.display(), e)))?;
    let mut perms = fs::metadata(path)
        .map_err(|e| RelayError::message(format!("stat {}: {}", path.display(), e)))?
        .permissions();
    perms.set_mode(0o700);
    fs::set_permissions(path, perms)
        .map_err(|e| RelayError::message(format!("chmod {}: {}", path.display(), e)))?;
    Ok(())
}

/// Replaces `path` with `data`, mode 0600. The new content is written to a
/// temporary file next to it and renamed into place, so a crash leaves
/// either the old file or the new one.
pub fn write_private_file(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_private_dir(parent)?;
    let fail = |what: &str, e: &dyn std::fmt::Display| {
        RelayError::message(format!("{} {}: {}", what, path.display(), e))
    };
    let mut tmp = Builder::new()
        .prefix(".borgrelay-")
        .permissions(fs::Permissions::from_mode(0o600))
        .tempfile_in(parent)
        .map_err(|e| fail("write", &e))?;
    tmp.write_all(data).map_err(|e| fail("write", &e))?;
    tmp.as_file().sync_all().map_err(|e| fail("sync", &e))?;
    tmp.persist(path).map_err(|e| fail("replace", &e.error))?;
    Ok(())
}

pub fn is_readable_file(path: &Path) -> bool {
    path.is_file() && fs::File::open(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn expand_tilde_only_touches_leading_home() {
        let home = Path::new("/home/ana");
        assert_eq!(expand_tilde("~", home), PathBuf::from("/home/ana"));
        assert_eq!(
            expand_tilde("~/.ssh/id_ed25519", home),
            PathBuf::from("/home/ana/.ssh/id_ed25519")
        );
        assert_eq!(expand_tilde("/srv/~/x", home), PathBuf::from("/srv/~/x"));
        assert_eq!(expand_tilde("~bob/x", home), PathBuf::from("~bob/x"));
    }

    #[test]
    fn xdg_dirs_fall_back_to_home() {
        let mut env = HashMap::new();
        env.insert("HOME".to_string(), "/home/ana".to_string());
        assert_eq!(config_dir(&env), PathBuf::from("/home/ana/.config/borgrelay"));
        assert_eq!(state_dir(&env), PathBuf::from("/home/ana/.local/state/borgrelay"));
        env.insert("XDG_CONFIG_HOME".to_string(), "relative".to_string());
        assert_eq!(config_dir(&env), PathBuf::from("/home/ana/.config/borgrelay"));
        env.insert("XDG_RUNTIME_DIR".to_string(), "/run/user/1000".to_string());
        assert_eq!(runtime_dir(&env), PathBuf::from("/run/user/1000/borgrelay"));
    }

    #[test]
    fn private_file_is_0600() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("conf").join("passphrase");
        write_private_file(&path, b"secret\n").expect("write");
        let mode = fs::metadata(&path).expect("stat").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap())
            .expect("stat")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn rewrite_replaces_whole_file_and_leaves_no_temporaries() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, "repoUrl: ssh://old@host/a-much-longer-previous-path\n").expect("seed");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).expect("chmod");
        write_private_file(&path, b"repoUrl: ssh://u@h/r\n").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "repoUrl: ssh://u@h/r\n");
        let mode = fs::metadata(&path).expect("stat").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let names: Vec<_> = fs::read_dir(dir.path())
            .expect("ls")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("config.yaml")]);
    }
}
