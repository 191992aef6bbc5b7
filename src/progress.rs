//! Progress parsing for downloader output lines.

use once_cell::sync::Lazy;
use regex::Regex;

/// Marker token the downloader prefixes its transfer lines with
pub const DOWNLOAD_MARKER: &str = "[download]";

static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+\.\d+)%").unwrap_or_else(|_| unreachable!()));

/// Extracts the completion percentage from a progress line.
///
/// `"[download]  45.6% of 10.00MiB at 1.2MiB/s"` yields `Some(45.6)`. Lines
/// without the marker or without a `<digits>.<digits>%` token yield `None`.
pub fn parse_progress_from_line(line: &str) -> Option<f32> {
    if !line.contains(DOWNLOAD_MARKER) {
        return None;
    }
    let caps = PERCENT_RE.captures(line)?;
    let pct: f32 = caps.get(1)?.as_str().parse().ok()?;
    pct.is_finite().then(|| pct.clamp(0.0, 100.0))
}

/// Reassembles complete lines from arbitrary output chunks.
///
/// Both `\n` and `\r` end a line; empty lines are dropped.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: String,
}

impl LineSplitter {
    /// Feeds a chunk, returning every line it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let mut lines = Vec::new();
        for ch in chunk.chars() {
            if ch == '\n' || ch == '\r' {
                if !self.pending.is_empty() {
                    lines.push(std::mem::take(&mut self.pending));
                }
            } else {
                self.pending.push(ch);
            }
        }
        lines
    }

    /// Returns the unterminated tail, if any.
    pub fn flush(&mut self) -> Option<String> {
        (!self.pending.is_empty()).then(|| std::mem::take(&mut self.pending))
    }
}
