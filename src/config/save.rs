use std::path::Path;

use tracing::info;

use crate::config::model::ConfigFile;
use crate::error::{RelayError, Result};
use crate::util::paths::write_private_file;

pub fn save_config(path: &Path, cfg: &ConfigFile) -> Result<()> {
    let data = serde_yaml::to_string(cfg)
        .map_err(|e| RelayError::message(format!("encode config: {}", e)))?;
    write_private_file(path, data.as_bytes())?;
    info!(path = %path.display(), "saved configuration");
    Ok(())
}

pub fn save_passphrase(path: &Path, passphrase: &str) -> Result<()> {
    write_private_file(path, format!("{}\n", passphrase).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load::read_config_file;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn saved_config_reads_back_and_is_private() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("borgrelay").join("config.yaml");
        let cfg = ConfigFile {
            repo_url: Some("ssh://me@vault:2222/./images".to_string()),
            keep_last: Some(4),
            search_roots: Some(vec!["/media".to_string()]),
            ..ConfigFile::default()
        };
        save_config(&path, &cfg).expect("save");
        let loaded = read_config_file(&path).expect("read").expect("present");
        assert_eq!(loaded, cfg);
        let mode = std::fs::metadata(&path).expect("stat").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("repoUrl:"));
        assert!(!text.contains("sshKey"));
    }
}
