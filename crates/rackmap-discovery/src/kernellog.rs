//! Kernel log access.
//!
//! Discovery treats the kernel ring buffer as its event source: USB attach
//! lines tell us which boards enumerated and when. Every line carries a
//! bracketed uptime timestamp, so "what happened after we flipped a relay"
//! reduces to comparing timestamps against a mark taken before the flip.

use std::process::Command;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dmesg exited with {0}")]
    Dmesg(String),
}

/// Evidence window over the kernel log. A line counts as evidence only if
/// its timestamp is strictly newer than the mark the window was opened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampWindow {
    start: u64,
}

impl TimestampWindow {
    pub fn starting_at(start: u64) -> Self {
        Self { start }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Whether a log line was emitted after the window opened. Lines without
    /// a parseable timestamp are never admitted.
    pub fn admits(&self, line: &str) -> bool {
        matches!(line_timestamp(line), Some(ts) if ts > self.start)
    }
}

/// Extracts the whole-second part of a dmesg timestamp:
/// `[328860.109597] usb 2-1.4.1.2: Product: Edison` yields 328860.
pub fn line_timestamp(line: &str) -> Option<u64> {
    let open = line.find('[')?;
    let rest = &line[open + 1..];
    let dot = rest.find('.')?;
    rest[..dot].trim().parse().ok()
}

/// Current contents of the kernel ring buffer, one line per entry.
pub fn snapshot() -> Result<Vec<String>, KernelLogError> {
    let output = Command::new("dmesg").output()?;
    if !output.status.success() {
        return Err(KernelLogError::Dmesg(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .collect())
}

/// Timestamp of the newest log line, or 0 for an empty buffer. Used as the
/// mark for a [`TimestampWindow`] opened just before a power action.
pub fn newest_timestamp() -> Result<u64, KernelLogError> {
    Ok(newest_in(&snapshot()?))
}

pub fn newest_in(lines: &[String]) -> u64 {
    lines
        .iter()
        .rev()
        .find_map(|line| line_timestamp(line))
        .unwrap_or(0)
}
