use std::path::{Path, PathBuf};

use crate::cli::commands::archives::fetch_archives;
use crate::cli::commands::test::preflight;
use crate::cli::commands::{ask, interactive, Context};
use crate::error::{RelayError, Result};
use crate::job::{start_download, start_upload, Started};
use crate::source::locate_source;
use crate::types::ArchiveName;

fn report(started: &Started) {
    println!(
        "{} of {} started in the background (pid {}); follow it with `borgrelay log -f`",
        started.kind, started.archive, started.pid
    );
}

pub fn run_upload(ctx: &Context) -> Result<Started> {
    if let Some(pid) = ctx.store.running_pid() {
        return Err(RelayError::JobAlreadyRunning(pid));
    }
    preflight(ctx)?;
    let key = ctx.key()?;
    let source = locate_source(&ctx.settings)?;
    println!("source: {} ({})", source.dir.display(), source.stem);
    let started = start_upload(&ctx.settings, key.as_deref(), &ctx.store, &source)?;
    report(&started);
    Ok(started)
}

/// Lets the user pick an archive by number or name, newest listed first.
pub fn choose_archive(archives: &[String], question: &str) -> Result<Option<ArchiveName>> {
    if archives.is_empty() {
        return Ok(None);
    }
    let newest_first: Vec<&String> = archives.iter().rev().collect();
    for (i, name) in newest_first.iter().enumerate() {
        println!("  {:>2}) {}", i + 1, name);
    }
    let Some(answer) = ask(question)? else {
        return Ok(None);
    };
    if answer.is_empty() {
        return Ok(None);
    }
    let picked = match answer.parse::<usize>() {
        Ok(n) if n >= 1 && n <= newest_first.len() => newest_first[n - 1].clone(),
        _ => answer,
    };
    picked.parse().map(Some).map_err(RelayError::Message)
}

pub fn run_download(ctx: &Context, archive: Option<&str>, target: Option<&Path>) -> Result<Option<Started>> {
    if let Some(pid) = ctx.store.running_pid() {
        return Err(RelayError::JobAlreadyRunning(pid));
    }
    preflight(ctx)?;
    let key = ctx.key()?;
    let archive: ArchiveName = match archive {
        Some(name) => name.parse().map_err(RelayError::Message)?,
        None => {
            if !interactive() {
                return Err(RelayError::message("archive name required"));
            }
            let archives = fetch_archives(ctx, key.as_deref())?;
            if archives.is_empty() {
                println!("no archives in {}", ctx.settings.repo);
                return Ok(None);
            }
            match choose_archive(&archives, "archive (number or name): ")? {
                Some(archive) => archive,
                None => return Ok(None),
            }
        }
    };
    let target = target.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let started = start_download(&ctx.settings, key.as_deref(), &ctx.store, &archive, &target)?;
    report(&started);
    Ok(Some(started))
}
