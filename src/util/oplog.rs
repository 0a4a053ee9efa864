//! Append-only operation log shared by the foreground process and the worker.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::Local;

pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Appends one timestamped line per line of `text`.
pub fn append(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let ts = timestamp();
    for line in text.lines() {
        writeln!(file, "{} {}", ts, line)?;
    }
    Ok(())
}

/// Records a subprocess invocation and its raw output.
pub fn append_command(path: &Path, command_line: &str, code: i32, output: &str) -> io::Result<()> {
    let mut text = format!("$ {} (exit {})", command_line, code);
    for line in output.lines() {
        text.push_str("\n  ");
        text.push_str(line);
    }
    append(path, &text)
}

pub fn tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let all: Vec<&str> = contents.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].iter().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_creates_parent_and_tail_returns_newest() {
        let dir = TempDir::new().expect("tempdir");
        let log = dir.path().join("state").join("borgrelay.log");
        append(&log, "first").expect("append");
        append_command(&log, "borg info ssh://u@h/repo", 2, "line a\nline b").expect("append");
        let last = tail(&log, 2).expect("tail");
        assert_eq!(last.len(), 2);
        assert!(last[0].ends_with("  line a"));
        assert!(last[1].ends_with("  line b"));
        let all = tail(&log, 100).expect("tail");
        assert!(all[0].ends_with(" first"));
        assert!(all[1].contains("$ borg info ssh://u@h/repo (exit 2)"));
    }

    #[test]
    fn tail_of_missing_log_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        assert!(tail(&dir.path().join("none.log"), 5).expect("tail").is_empty());
    }
}
