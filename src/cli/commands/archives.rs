use std::path::Path;
use std::process::Command;

use tracing::{info, warn};

use crate::borg::classify::{classify, last_line, Failure};
use crate::borg::{parse_archive_list, BorgContext};
use crate::cli::commands::test::preflight;
use crate::cli::commands::{ask, interactive, Context};
use crate::error::{RelayError, Result};
use crate::types::ArchiveName;
use crate::util::command::{command_line, run_captured, Captured};
use crate::util::oplog;

/// Runs a short borg command in the foreground, logging it like the worker does.
fn run_borg(ctx: &Context, step: &str, mut cmd: Command) -> Result<Captured> {
    let cmdline = command_line(&cmd);
    let out = run_captured(&mut cmd)?;
    if let Err(err) =
        oplog::append_command(&ctx.settings.log_file, &cmdline, out.code, &out.combined())
    {
        warn!("cannot write operation log: {}", err);
    }
    if out.success() {
        return Ok(out);
    }
    let text = out.combined();
    match classify(&text) {
        Failure::LockTimeout => Err(RelayError::RepoLocked(last_line(&text).to_string())),
        failure => Err(RelayError::WorkerExecutionFailed {
            step: step.to_string(),
            code: out.code,
            reason: format!("{}: {}", failure, last_line(&text)),
        }),
    }
}

/// Archive names, oldest first. Assumes connectivity was checked.
pub fn fetch_archives(ctx: &Context, key: Option<&Path>) -> Result<Vec<String>> {
    let borg = BorgContext::new(&ctx.settings, key);
    let out = run_borg(ctx, "list", borg.list())?;
    Ok(parse_archive_list(&out.stdout))
}

pub fn run_list(ctx: &Context) -> Result<()> {
    preflight(ctx)?;
    let key = ctx.key()?;
    let archives = fetch_archives(ctx, key.as_deref())?;
    if archives.is_empty() {
        println!("no archives in {}", ctx.settings.repo);
    }
    for name in archives {
        println!("{}", name);
    }
    Ok(())
}

pub fn run_delete(ctx: &Context, archive: &str, yes: bool) -> Result<()> {
    let archive: ArchiveName = archive.parse().map_err(RelayError::Message)?;
    if let Some(pid) = ctx.store.running_pid() {
        return Err(RelayError::JobAlreadyRunning(pid));
    }
    if !yes {
        if !interactive() {
            return Err(RelayError::message(
                "refusing to delete without confirmation; pass --yes",
            ));
        }
        let answer = ask(&format!("delete archive {}? [y/N] ", archive))?;
        if !matches!(answer.as_deref(), Some("y") | Some("Y") | Some("yes") | Some("j") | Some("J")) {
            println!("not deleted");
            return Ok(());
        }
    }
    preflight(ctx)?;
    let key = ctx.key()?;
    let borg = BorgContext::new(&ctx.settings, key.as_deref());
    run_borg(ctx, "delete", borg.delete(&archive))?;
    info!(archive = %archive, "archive deleted");
    println!("deleted {}", archive);
    Ok(())
}
