use std::env;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::args::{Cli, Command};
use crate::cli::commands::{archives, exit_for_error, jobs, setup, test, transfer, worker, Context};
use crate::remote::askpass;

pub mod args;
pub mod commands;
pub mod i18n;
pub mod menu;

pub fn run() -> Result<()> {
    // ssh starts us as SSH_ASKPASS with only its prompt as argument.
    if let Some(file) = askpass::requested() {
        match askpass::answer(&file) {
            Ok(passphrase) => {
                println!("{}", passphrase);
                std::process::exit(0);
            }
            Err(err) => {
                eprintln!("borgrelay: {}", err);
                std::process::exit(1);
            }
        }
    }
    let cli = Cli::parse();
    let command = cli.command.clone().unwrap_or(Command::Menu);
    match &command {
        Command::Worker(_) => init_worker_tracing(),
        _ => init_tracing(cli.verbose),
    }
    let config = cli.config.as_deref();

    let result = match command {
        Command::Menu => menu::run_menu(config),
        Command::Config => setup::run_setup(config),
        Command::Worker(args) => worker::run_worker_command(&args),
        other => Context::load(config).and_then(|ctx| dispatch(&ctx, other)),
    };
    if let Err(err) = result {
        exit_for_error(&err);
    }
    Ok(())
}

fn dispatch(ctx: &Context, command: Command) -> crate::error::Result<()> {
    match command {
        Command::Test(args) => test::run_test(ctx, args.ssh_only),
        Command::Upload => transfer::run_upload(ctx).map(drop),
        Command::Download(args) => {
            transfer::run_download(ctx, args.archive.as_deref(), args.target.as_deref()).map(drop)
        }
        Command::List => archives::run_list(ctx),
        Command::Status => jobs::run_status(ctx),
        Command::Stop => jobs::run_stop(ctx),
        Command::Log(args) => jobs::run_log(ctx, args.lines, args.follow, args.until_idle),
        Command::Delete(args) => archives::run_delete(ctx, &args.archive, args.yes),
        Command::Clear => jobs::run_clear(ctx),
        Command::Menu | Command::Config | Command::Worker(_) => Ok(()),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// The worker has no terminal; its diagnostics go to the operation log.
fn init_worker_tracing() {
    let Some(path) = env::var_os("BORGRELAY_LOG_FILE").map(PathBuf::from) else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("info"))
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .try_init();
}
