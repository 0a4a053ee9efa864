use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::types::JobKind;

#[derive(Parser, Debug)]
#[command(
    name = "borgrelay",
    version,
    about = "Upload disk-image backups to a borg repository over ssh and restore them"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Use this file instead of ~/.config/borgrelay/config.yaml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// More log output on stderr (-v info, -vv debug)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Interactive menu (default)
    Menu,
    /// Setup wizard: write the configuration and passphrase files
    Config,
    /// Check ssh authentication and repository access
    Test(TestArgs),
    /// Upload the newest backup image set as a new archive
    Upload,
    /// Extract an archive into a local directory
    Download(DownloadArgs),
    /// List archives in the repository
    List,
    /// Show job and connectivity status
    Status,
    /// Stop the running job
    Stop,
    /// Show the operation log
    Log(LogArgs),
    /// Delete an archive from the repository
    Delete(DeleteArgs),
    /// Remove status files when no job is running
    Clear,
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct TestArgs {
    /// Only check ssh authentication
    #[arg(long)]
    pub ssh_only: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DownloadArgs {
    /// Archive name; asked for interactively when omitted
    pub archive: Option<String>,
    /// Directory to extract into (default: current directory)
    #[arg(long, short = 't')]
    pub target: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    #[arg(long, short = 'n', default_value_t = 40)]
    pub lines: usize,
    /// Keep printing new lines
    #[arg(long, short = 'f')]
    pub follow: bool,
    /// With --follow, stop once no job is running
    #[arg(long)]
    pub until_idle: bool,
}

impl Default for LogArgs {
    fn default() -> Self {
        Self {
            lines: 40,
            follow: false,
            until_idle: false,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    pub archive: String,
    /// Do not ask for confirmation
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Upload,
    Download,
}

impl From<WorkerKind> for JobKind {
    fn from(kind: WorkerKind) -> Self {
        match kind {
            WorkerKind::Upload => JobKind::Upload,
            WorkerKind::Download => JobKind::Download,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    #[arg(value_enum)]
    pub kind: WorkerKind,
    #[arg(long)]
    pub archive: String,
    #[arg(long)]
    pub source: Option<PathBuf>,
    #[arg(long)]
    pub target: Option<PathBuf>,
}
