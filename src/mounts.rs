use std::fs;
use std::path::PathBuf;

use crate::error::{RelayError, Result};

const PSEUDO_FS: [&str; 20] = [
    "proc",
    "sysfs",
    "tmpfs",
    "devtmpfs",
    "devpts",
    "cgroup",
    "cgroup2",
    "securityfs",
    "pstore",
    "bpf",
    "debugfs",
    "tracefs",
    "mqueue",
    "hugetlbfs",
    "configfs",
    "fusectl",
    "autofs",
    "overlay",
    "binfmt_misc",
    "efivarfs",
];

fn read_mounts() -> Result<String> {
    fs::read_to_string("/proc/self/mounts")
        .map_err(|e| RelayError::message(format!("read /proc/self/mounts: {}", e)))
}

/// Mount points of real filesystems, in mount-table order.
pub fn mounted_targets() -> Result<Vec<PathBuf>> {
    Ok(parse_targets(&read_mounts()?))
}

pub fn parse_targets(contents: &str) -> Vec<PathBuf> {
    let mut targets = Vec::new();
    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        if PSEUDO_FS.contains(&fields[2]) {
            continue;
        }
        targets.push(PathBuf::from(unescape(fields[1])));
    }
    targets
}

/// Undoes the octal escapes (`\040` for space and friends) used in the mount table.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}
