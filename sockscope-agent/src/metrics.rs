use anyhow::{Context, Result};
use log::info;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize the Prometheus metrics exporter and register metric descriptions.
pub fn init(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    describe_counter!(
        "sockscope_events_total",
        "Total probe events accepted, by kind"
    );
    describe_counter!(
        "sockscope_records_total",
        "Total request/response records emitted"
    );
    describe_gauge!(
        "sockscope_active_connections",
        "Connection trackers currently alive"
    );

    info!("Prometheus metrics listening on {}", addr);
    Ok(())
}

/// Record an accepted probe event.
pub fn record_event(kind: &str) {
    counter!("sockscope_events_total", "kind" => kind.to_string()).increment(1);
}

/// Record emitted request/response records.
pub fn record_records(count: u64) {
    counter!("sockscope_records_total").increment(count);
}

/// Set the gauge for active connection trackers.
pub fn set_active_connections(count: usize) {
    gauge!("sockscope_active_connections").set(count as f64);
}
