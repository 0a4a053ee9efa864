use crate::cli::args::WorkerArgs;
use crate::error::{RelayError, Result};
use crate::job::worker::{run_worker, WorkerRequest};

pub fn run_worker_command(args: &WorkerArgs) -> Result<()> {
    let request = WorkerRequest {
        kind: args.kind.into(),
        archive: args.archive.parse().map_err(RelayError::Message)?,
        source: args.source.clone(),
        target: args.target.clone(),
    };
    run_worker(&request)
}
