pub mod askpass;
pub mod identity;
pub mod known_hosts;
pub mod url;

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::Settings;
use crate::error::Result;

pub use askpass::Askpass;
pub use url::RepoUrl;

/// Key for this run: the configured one, or whatever the resolver discovers.
pub fn resolve_key(settings: &Settings) -> Result<Option<PathBuf>> {
    identity::resolve_identity(
        settings.ssh_key.as_deref(),
        settings.ssh_key_hint.as_deref(),
        &settings.home,
    )
}

impl<'a> SshOptions<'a> {
    pub fn for_settings(settings: &'a Settings, key: Option<&'a Path>) -> Self {
        SshOptions {
            ssh_bin: &settings.ssh_bin,
            key,
            known_hosts: &settings.known_hosts,
            connect_timeout: settings.timeouts.ssh_connect,
            accept_new_hostkeys: settings.auto_accept_hostkey,
            port: settings.repo.port,
            askpass: settings
                .ssh_key_passphrase_file
                .is_file()
                .then(|| Askpass::for_file(&settings.ssh_key_passphrase_file))
                .flatten(),
        }
    }
}

/// Options shared by every ssh invocation, either run directly (auth probe) or
/// through the archiver's remote-shell setting.
#[derive(Debug, Clone)]
pub struct SshOptions<'a> {
    pub ssh_bin: &'a str,
    pub key: Option<&'a Path>,
    pub known_hosts: &'a Path,
    pub connect_timeout: u64,
    pub accept_new_hostkeys: bool,
    pub port: Option<u16>,
    /// Answers key passphrase prompts; ssh runs without batch mode then.
    pub askpass: Option<Askpass>,
}

impl SshOptions<'_> {
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut opt = |value: String| {
            args.push("-o".to_string());
            args.push(value);
        };
        if self.askpass.is_some() {
            // Only the key passphrase may be asked for, and only through askpass.
            opt("BatchMode=no".to_string());
            opt("NumberOfPasswordPrompts=1".to_string());
            opt("PasswordAuthentication=no".to_string());
            opt("KbdInteractiveAuthentication=no".to_string());
        } else {
            opt("BatchMode=yes".to_string());
        }
        opt(format!("ConnectTimeout={}", self.connect_timeout));
        opt(format!(
            "StrictHostKeyChecking={}",
            if self.accept_new_hostkeys { "accept-new" } else { "yes" }
        ));
        opt(format!(
            "UserKnownHostsFile={}",
            ssh_config_value(&self.known_hosts.display().to_string())
        ));
        if let Some(key) = self.key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args
    }

    /// Remote-shell command line for `BORG_RSH`. The port travels in the repository URL.
    pub fn rsh(&self) -> String {
        let without_port = SshOptions {
            port: None,
            ..self.clone()
        };
        let mut parts = vec![shell_quote(self.ssh_bin)];
        parts.extend(without_port.args().iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }

    /// Non-interactive authentication check against `destination`.
    pub fn auth_check(&self, destination: &str) -> Command {
        let mut cmd = Command::new(self.ssh_bin);
        cmd.args(self.args()).arg("-T").arg(destination).arg("exit");
        cmd.envs(self.env());
        cmd
    }

    /// Extra environment ssh needs, directly or through the archiver.
    pub fn env(&self) -> Vec<(String, String)> {
        self.askpass.as_ref().map(Askpass::env).unwrap_or_default()
    }
}

/// ssh splits option values on whitespace; its own double quotes keep a
/// path with spaces in one piece.
fn ssh_config_value(value: &str) -> String {
    if value.chars().any(char::is_whitespace) {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

/// Quotes `value` for a POSIX shell when it contains anything beyond a safe alphabet.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | ':' | ',' | '@' | '+'))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
