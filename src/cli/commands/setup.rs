//! `borgrelay config`: interactive setup of the user configuration file.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::load::{load_layers, load_settings, read_config_file};
use crate::config::save::{save_config, save_passphrase};
use crate::config::{ConfigFile, ConfigSources};
use crate::error::{RelayError, Result};
use crate::remote::known_hosts;
use crate::remote::RepoUrl;
use crate::types::Lang;

struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    /// Asks with the current value as default. Empty input keeps it, `-` clears it.
    fn field(&mut self, label: &str, current: Option<&str>) -> Result<Option<String>> {
        match current {
            Some(value) => write!(self.output, "{} [{}]: ", label, value)?,
            None => write!(self.output, "{}: ", label)?,
        }
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(current.map(str::to_string));
        }
        let answer = line.trim();
        Ok(match answer {
            "" => current.map(str::to_string),
            "-" => None,
            other => Some(other.to_string()),
        })
    }

    fn yes_no(&mut self, label: &str, current: bool) -> Result<bool> {
        let shown = if current { "yes" } else { "no" };
        loop {
            let answer = self.field(label, Some(shown))?;
            match answer.as_deref().map(str::to_ascii_lowercase).as_deref() {
                Some("y" | "yes" | "j" | "ja" | "true" | "1") => return Ok(true),
                Some("n" | "no" | "nein" | "false" | "0") => return Ok(false),
                None => return Ok(current),
                Some(_) => writeln!(self.output, "  please answer yes or no")?,
            }
        }
    }
}

/// Passphrases entered during setup. They go to their own 0600 files, never into the config.
#[derive(Debug, Default)]
struct Secrets {
    repository: Option<String>,
    ssh_key: Option<String>,
}

fn edit(cfg: &mut ConfigFile, merged: &ConfigFile, p: &mut Prompter<impl BufRead, impl Write>) -> Result<Secrets> {
    loop {
        let url = p.field(
            "repository URL (ssh://user@host[:port]/path)",
            cfg.repo_url.as_deref().or(merged.repo_url.as_deref()),
        )?;
        match url.as_deref().map(RepoUrl::parse) {
            Some(Ok(_)) => {
                cfg.repo_url = url;
                break;
            }
            Some(Err(err)) => writeln!(p.output, "  {}", err)?,
            None => return Err(RelayError::message("a repository URL is required")),
        }
    }
    cfg.source_dir = p.field(
        "source directory (- to search mounted disks)",
        cfg.source_dir.as_deref().or(merged.source_dir.as_deref()),
    )?;
    cfg.ssh_key = p.field(
        "ssh private key (- to pick automatically)",
        cfg.ssh_key.as_deref().or(merged.ssh_key.as_deref()),
    )?;
    cfg.ssh_key_hint = p.field(
        "preferred key name contains (- for none)",
        cfg.ssh_key_hint.as_deref().or(merged.ssh_key_hint.as_deref()),
    )?;
    let prune = p.yes_no(
        "prune old archives after upload",
        cfg.prune_enabled.or(merged.prune_enabled).unwrap_or(true),
    )?;
    cfg.prune_enabled = Some(prune);
    if prune {
        loop {
            let current = cfg.keep_last.or(merged.keep_last).unwrap_or(3).to_string();
            let answer = p.field("archives to keep", Some(&current))?;
            match answer.as_deref().map(str::parse::<u32>) {
                Some(Ok(n)) if n >= 1 => {
                    cfg.keep_last = Some(n);
                    break;
                }
                None => break,
                _ => writeln!(p.output, "  enter a number of at least 1")?,
            }
        }
    }
    loop {
        let current = cfg
            .lang
            .clone()
            .or_else(|| merged.lang.clone())
            .unwrap_or_else(|| Lang::default().as_str().to_string());
        let answer = p.field("language (en/de)", Some(&current))?;
        match answer.as_deref().map(Lang::parse) {
            Some(Ok(lang)) => {
                cfg.lang = Some(lang.as_str().to_string());
                break;
            }
            Some(Err(err)) => writeln!(p.output, "  {}", err)?,
            None => break,
        }
    }
    let repository = p.field("repository passphrase (empty keeps the current one)", None)?;
    let ssh_key = p.field("ssh key passphrase (empty if the key has none)", None)?;
    Ok(Secrets { repository, ssh_key })
}

fn save_secrets(secrets: Secrets, repository_file: &Path, ssh_key_file: &Path, out: &mut impl Write) -> Result<()> {
    let pairs = [
        ("passphrase", secrets.repository, repository_file),
        ("ssh key passphrase", secrets.ssh_key, ssh_key_file),
    ];
    for (what, value, file) in pairs {
        if let Some(value) = value.filter(|s| !s.is_empty()) {
            save_passphrase(file, &value)?;
            writeln!(out, "saved {} to {}", what, file.display())?;
        }
    }
    Ok(())
}

pub fn run_setup(config: Option<&Path>) -> Result<()> {
    let stdin = io::stdin();
    let mut prompter = Prompter {
        input: stdin.lock(),
        output: io::stdout(),
    };
    setup_with(config.map(Path::to_path_buf), &mut prompter)
}

fn setup_with(config: Option<PathBuf>, p: &mut Prompter<impl BufRead, impl Write>) -> Result<()> {
    let sources = ConfigSources::from_process(config);
    let merged = load_layers(&sources)?;
    let path = sources
        .local
        .clone()
        .ok_or_else(|| RelayError::message("no configuration file path"))?;
    let mut cfg = read_config_file(&path)?.unwrap_or_default();
    let secrets = edit(&mut cfg, &merged, p)?;
    save_config(&path, &cfg)?;
    writeln!(p.output, "saved {}", path.display())?;

    let settings = load_settings(&sources)?;
    save_secrets(
        secrets,
        &settings.passphrase_file,
        &settings.ssh_key_passphrase_file,
        &mut p.output,
    )?;
    let known = known_hosts::is_known(&settings.known_hosts, &settings.repo);
    if known == Some(false)
        && p.yes_no(
            &format!("trust the host key of {} now", settings.repo.known_hosts_token()),
            false,
        )?
    {
        match known_hosts::trust_host(&settings.known_hosts, &settings.repo, settings.timeouts.ssh_connect) {
            Ok(n) => writeln!(p.output, "added {} host key(s) to {}", n, settings.known_hosts.display())?,
            Err(err) => {
                warn!("{}", err);
                writeln!(p.output, "  {}", err)?;
            }
        }
    }
    Ok(())
}
