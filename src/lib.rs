pub mod borg;
pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod mounts;
pub mod probe;
pub mod remote;
pub mod signal_handler;
pub mod source;
pub mod status;
pub mod types;
pub mod util;
