//! Userspace core of the sockscope socket tracer.
//!
//! The eBPF probe (a separate repo) captures connection open/close events
//! and send/recv payload fragments from sockets in other processes and
//! ships them over a perf ring. This crate is everything after that ring:
//! it demultiplexes events into per-connection [`tracker::ConnectionTracker`]s,
//! reassembles each direction's byte stream from sequence-numbered
//! fragments, drives the streams through the HTTP/1 and HTTP/2 parsers,
//! pairs requests with responses, and appends the surviving pairs to a
//! columnar record sink.
//!
//! Events may arrive out of order, duplicated, or not at all; the core
//! detects gaps and resolves them through bounded retry, stream resets on
//! inactivity, and tracker death countdowns.
//!
//! # Feature flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `prometheus` | Prometheus metrics exporter |
//!
//! # Usage
//!
//! ```no_run
//! use sockscope_agent::{run_agent, AgentConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AgentConfig {
//!     replay_path: None,
//!     format: "text".into(),
//!     poll_interval: Duration::from_millis(100),
//!     inactivity_duration: Duration::from_secs(30),
//!     death_countdown_iters: 3,
//!     metrics_port: 9184,
//! };
//! run_agent(config).await
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod connector;
pub mod filter;
#[cfg(feature = "prometheus")]
pub mod metrics;
pub mod sink;
pub mod source;
pub mod stream;
pub mod tracker;

use crate::config::ConnectorConfig;
use crate::connector::SocketTraceConnector;
use crate::sink::{HttpRecord, JsonLineWriter, RecordSink, TextWriter};
use crate::source::ReplaySource;
use anyhow::Result;
use log::{info, warn};
use sockscope_types::SocketEvent;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;
use tokio::{
    signal,
    sync::mpsc,
    task,
    time::{interval, MissedTickBehavior},
};

/// Configuration for the tracer core.
pub struct AgentConfig {
    /// Replay file of JSON-lines events; None reads stdin.
    pub replay_path: Option<PathBuf>,
    /// Output format (json, text).
    pub format: String,
    /// Interval between `transfer_data` iterations.
    pub poll_interval: Duration,
    pub inactivity_duration: Duration,
    pub death_countdown_iters: i32,
    pub metrics_port: u16,
}

/// Run the dispatcher loop until the event source is exhausted or the
/// process is interrupted.
pub async fn run_agent(config: AgentConfig) -> Result<()> {
    #[cfg(feature = "prometheus")]
    metrics::init(config.metrics_port)?;

    let connector_config = ConnectorConfig {
        inactivity_duration: config.inactivity_duration,
        death_countdown_iters: config.death_countdown_iters,
        ..ConnectorConfig::default()
    };
    let mut connector = SocketTraceConnector::new(connector_config);
    connector.init_clock_real_time_offset();

    // One task reads the event source; the dispatcher loop below is the
    // sole writer of tracker state.
    let (tx, rx) = mpsc::channel::<SocketEvent>(1024);
    let replay_path = config.replay_path.clone();
    task::spawn_blocking(move || {
        let result = match replay_path {
            Some(path) => {
                ReplaySource::open(path).and_then(|source| pump_events(source, tx))
            }
            None => pump_events(ReplaySource::new(BufReader::new(std::io::stdin())), tx),
        };
        if let Err(e) = result {
            warn!("Event source terminated: {:#}", e);
        }
    });

    match config.format.as_str() {
        "json" => {
            run_loop(
                connector,
                rx,
                JsonLineWriter::new(std::io::stdout()),
                config.poll_interval,
            )
            .await
        }
        _ => {
            run_loop(
                connector,
                rx,
                TextWriter::new(std::io::stdout()),
                config.poll_interval,
            )
            .await
        }
    }
}

fn pump_events<R: BufRead>(
    mut source: ReplaySource<R>,
    tx: mpsc::Sender<SocketEvent>,
) -> Result<()> {
    while let Some(event) = source.next_event()? {
        if tx.blocking_send(event).is_err() {
            // Dispatcher is gone; nothing left to feed.
            break;
        }
    }
    Ok(())
}

/// Counts appended records on the way through to the real sink.
struct CountingSink<S> {
    inner: S,
    appended: u64,
}

impl<S: RecordSink> RecordSink for CountingSink<S> {
    fn append(&mut self, record: HttpRecord) {
        self.appended += 1;
        self.inner.append(record);
    }
}

async fn run_loop<S: RecordSink>(
    mut connector: SocketTraceConnector,
    mut rx: mpsc::Receiver<SocketEvent>,
    sink: S,
    poll_interval: Duration,
) -> Result<()> {
    let mut sink = CountingSink {
        inner: sink,
        appended: 0,
    };
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        #[cfg(feature = "prometheus")]
                        metrics::record_event(match &event {
                            SocketEvent::Open(_) => "open",
                            SocketEvent::Close(_) => "close",
                            SocketEvent::Data(_) => "data",
                        });
                        connector.accept_event(event);
                    }
                    None => {
                        // Source exhausted: one final iteration to flush
                        // whatever is already complete.
                        connector.transfer_data(&mut sink);
                        info!(
                            "Event source exhausted; emitted {} records, {} connections still tracked",
                            sink.appended,
                            connector.num_active_connections()
                        );
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                #[cfg(feature = "prometheus")]
                let before = sink.appended;
                connector.transfer_data(&mut sink);
                #[cfg(feature = "prometheus")]
                {
                    metrics::record_records(sink.appended - before);
                    metrics::set_active_connections(connector.num_active_connections());
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received interrupt; emitted {} records", sink.appended);
                break;
            }
        }
    }

    Ok(())
}
