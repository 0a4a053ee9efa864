use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::thread;
use std::time::Duration;

use chrono::Local;

use crate::cli::commands::Context;
use crate::error::Result;
use crate::job::stop::stop_job;
use crate::job::worker::format_duration;
use crate::status::StatusStore;
use crate::util::oplog;

const FOLLOW_POLL: Duration = Duration::from_millis(500);

pub struct StatusView {
    pub job: String,
    pub conn: String,
    pub running: Option<(u32, Option<Duration>)>,
}

pub fn status_view(store: &StatusStore) -> StatusView {
    let running = store.running_pid().map(|pid| {
        let elapsed = store.start_time().map(|start| {
            Duration::from_secs((Local::now().timestamp() - start).max(0) as u64)
        });
        (pid, elapsed)
    });
    StatusView {
        job: store.job_status().unwrap_or_else(|| "idle".to_string()),
        conn: store.conn_status().unwrap_or_else(|| "not tested".to_string()),
        running,
    }
}

pub fn run_status(ctx: &Context) -> Result<()> {
    let view = status_view(&ctx.store);
    println!("job:        {}", view.job);
    println!("connection: {}", view.conn);
    match view.running {
        Some((pid, Some(elapsed))) => {
            println!("running:    pid {} for {}", pid, format_duration(elapsed))
        }
        Some((pid, None)) => println!("running:    pid {}", pid),
        None => println!("running:    no"),
    }
    Ok(())
}

pub fn run_stop(ctx: &Context) -> Result<()> {
    let pid = stop_job(&ctx.settings, &ctx.store)?;
    println!("stopped job (pid {})", pid);
    Ok(())
}

pub fn run_clear(ctx: &Context) -> Result<()> {
    ctx.store.clear_status()?;
    println!("status cleared");
    Ok(())
}

/// Prints the log tail, then optionally follows appended lines.
pub fn run_log(ctx: &Context, lines: usize, follow: bool, until_idle: bool) -> Result<()> {
    let path = &ctx.settings.log_file;
    for line in oplog::tail(path, lines)? {
        println!("{}", line);
    }
    if !follow {
        return Ok(());
    }
    let mut offset = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
        Err(err) => return Err(err.into()),
    };
    loop {
        offset = print_from(path, offset)?;
        if until_idle && !ctx.store.is_job_running() {
            print_from(path, offset)?;
            return Ok(());
        }
        thread::sleep(FOLLOW_POLL);
    }
}

/// Prints complete lines appended after `offset`; returns the new offset.
/// A file that shrank was rotated or cleared and is read from the start.
fn print_from(path: &std::path::Path, offset: u64) -> Result<u64> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    let len = file.metadata()?.len();
    let mut pos = if len < offset { 0 } else { offset };
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(pos))?;
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 || !line.ends_with('\n') {
            break;
        }
        pos += n as u64;
        print!("{}", line);
    }
    Ok(pos)
}
