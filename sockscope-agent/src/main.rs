use anyhow::Result;
use clap::Parser;
use sockscope_agent::{run_agent, AgentConfig};
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "sockscope")]
#[command(about = "Socket tracer core: reassembles captured socket streams into HTTP records")]
struct Cli {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (json, text)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Replay file of JSON-lines probe events (reads stdin if omitted)
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Milliseconds between transfer iterations
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,

    /// Seconds of silence before a connection's liveness is probed
    #[arg(long, default_value_t = 30)]
    inactivity_secs: u64,

    /// Transfer iterations a closed connection lingers to absorb late events
    #[arg(long, default_value_t = 3)]
    death_countdown: i32,

    /// Prometheus exporter port (requires the `prometheus` feature)
    #[arg(long, default_value_t = 9184)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    run_agent(AgentConfig {
        replay_path: cli.replay,
        format: cli.format,
        poll_interval: Duration::from_millis(cli.poll_interval_ms),
        inactivity_duration: Duration::from_secs(cli.inactivity_secs),
        death_countdown_iters: cli.death_countdown,
        metrics_port: cli.metrics_port,
    })
    .await
}
