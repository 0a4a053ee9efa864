use std::fs;

/// True when `pid` is in the process table and not a zombie. A worker that
/// exited but was not yet reaped by whoever spawned it counts as gone.
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => process_state(&stat).map_or(false, |state| state != 'Z' && state != 'X'),
        Err(_) => false,
    }
}

/// State letter from `/proc/<pid>/stat`. The command name may contain spaces
/// and parentheses, so parse from the last `)`.
fn process_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.trim_start().chars().next()
}

pub fn parse_pid(text: &str) -> Option<u32> {
    text.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
}
