//! Record emission.
//!
//! The dispatcher appends one [`HttpRecord`] per matched request/response
//! pair to a [`RecordSink`]. [`RecordBatch`] is the columnar in-memory sink
//! the query layer consumes (and tests inspect); [`JsonLineWriter`] and
//! [`TextWriter`] are the CLI output consumers.

use log::warn;
use serde::Serialize;
use std::io::Write;

/// One matched request/response pair.
#[derive(Clone, Debug, Serialize)]
pub struct HttpRecord {
    /// Wall-clock timestamp (ns) of the response's first byte.
    pub time_ns: u64,
    pub pid: u32,
    pub fd: i32,
    /// Remote IP or unix path; empty when the open event was lost or
    /// unparseable.
    pub remote_addr: String,
    /// Zero for unix-domain or unknown remotes.
    pub remote_port: u16,
    pub req_method: String,
    pub req_path: String,
    pub req_headers: String,
    pub resp_status: u16,
    pub resp_headers: String,
    pub resp_body: String,
    /// Response first byte minus request first byte; zero when the request
    /// was not captured.
    pub latency_ns: u64,
}

/// Append-only record consumer.
pub trait RecordSink {
    fn append(&mut self, record: HttpRecord);
}

/// Columnar batch: one vector per column, rows aligned by index.
#[derive(Debug, Default)]
pub struct RecordBatch {
    pub times: Vec<u64>,
    pub pids: Vec<u32>,
    pub fds: Vec<i32>,
    pub remote_addrs: Vec<String>,
    pub remote_ports: Vec<u16>,
    pub req_methods: Vec<String>,
    pub req_paths: Vec<String>,
    pub req_headers: Vec<String>,
    pub resp_statuses: Vec<u16>,
    pub resp_headers: Vec<String>,
    pub resp_bodies: Vec<String>,
    pub latencies: Vec<u64>,
}

impl RecordBatch {
    pub fn new() -> RecordBatch {
        RecordBatch::default()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

impl RecordSink for RecordBatch {
    fn append(&mut self, record: HttpRecord) {
        self.times.push(record.time_ns);
        self.pids.push(record.pid);
        self.fds.push(record.fd);
        self.remote_addrs.push(record.remote_addr);
        self.remote_ports.push(record.remote_port);
        self.req_methods.push(record.req_method);
        self.req_paths.push(record.req_path);
        self.req_headers.push(record.req_headers);
        self.resp_statuses.push(record.resp_status);
        self.resp_headers.push(record.resp_headers);
        self.resp_bodies.push(record.resp_body);
        self.latencies.push(record.latency_ns);
    }
}

/// Writes each record as one JSON line.
pub struct JsonLineWriter<W: Write> {
    writer: W,
}

impl<W: Write> JsonLineWriter<W> {
    pub fn new(writer: W) -> JsonLineWriter<W> {
        JsonLineWriter { writer }
    }
}

impl<W: Write> RecordSink for JsonLineWriter<W> {
    fn append(&mut self, record: HttpRecord) {
        match serde_json::to_string(&record) {
            Ok(json) => {
                if let Err(e) = writeln!(self.writer, "{}", json) {
                    warn!("Failed to write record: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize record: {}", e),
        }
    }
}

/// Writes a compact human-readable line per record.
pub struct TextWriter<W: Write> {
    writer: W,
}

impl<W: Write> TextWriter<W> {
    pub fn new(writer: W) -> TextWriter<W> {
        TextWriter { writer }
    }
}

impl<W: Write> RecordSink for TextWriter<W> {
    fn append(&mut self, record: HttpRecord) {
        let latency_ms = record.latency_ns as f64 / 1e6;
        let result = writeln!(
            self.writer,
            "{} {} {} ({}) <- {}:{} | pid={} fd={} | {:.1} ms",
            record.req_method,
            record.req_path,
            record.resp_status,
            record.resp_body.len(),
            record.remote_addr,
            record.remote_port,
            record.pid,
            record.fd,
            latency_ms,
        );
        if let Err(e) = result {
            warn!("Failed to write record: {}", e);
        }
    }
}
