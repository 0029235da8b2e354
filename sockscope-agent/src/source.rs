//! Event sources.
//!
//! The perf-ring reader lives with the probe; what the core consumes is a
//! stream of [`SocketEvent`]s. [`ReplaySource`] reads them back from the
//! newline-delimited JSON format the probe-side tooling records, which is
//! also what development and load testing run against.

use anyhow::{Context, Result};
use sockscope_types::SocketEvent;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub struct ReplaySource<R> {
    reader: R,
    line_no: usize,
}

impl ReplaySource<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open replay file {}", path.as_ref().display()))?;
        Ok(ReplaySource::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        ReplaySource { reader, line_no: 0 }
    }

    /// Next event, or None at end of input. Blank lines are skipped.
    pub fn next_event(&mut self) -> Result<Option<SocketEvent>> {
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .context("Failed to read replay input")?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let event: SocketEvent = serde_json::from_str(trimmed)
                .with_context(|| format!("Malformed event on line {}", self.line_no))?;
            return Ok(Some(event));
        }
    }
}
