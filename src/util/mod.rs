pub mod command;
pub mod oplog;
pub mod paths;
