use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use statsd_bridge::{
    render_text, BridgeOptions, BridgeStats, Registry, SigFig, StatsdBridge,
    DEFAULT_QUEUE_CAPACITY,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Bridges StatsD UDP traffic to a Prometheus scrape endpoint.
#[derive(Parser, Debug)]
#[command(name = "statsd-bridge", version)]
struct Cli {
    /// The address on which to expose generated Prometheus metrics.
    #[arg(long, env = "STATSD_BRIDGE_LISTENING_ADDRESS", default_value = "0.0.0.0:8080")]
    listening_address: SocketAddr,

    /// The UDP address on which to receive StatsD metric lines.
    #[arg(
        long,
        env = "STATSD_BRIDGE_STATSD_LISTENING_ADDRESS",
        default_value = "0.0.0.0:9125"
    )]
    statsd_listening_address: SocketAddr,

    /// Metric mapping configuration file name.
    #[arg(long, env = "STATSD_BRIDGE_MAPPING_CONFIG")]
    mapping_config: Option<PathBuf>,

    /// How frequently to reset all summary metrics, in seconds.
    #[arg(
        long,
        env = "STATSD_BRIDGE_SUMMARY_FLUSH_INTERVAL",
        default_value_t = 900,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    summary_flush_interval: u64,

    /// Decoded events that may be pending before the UDP receiver blocks.
    #[arg(long, env = "STATSD_BRIDGE_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Significant figures kept by summary quantile estimators (0-5).
    #[arg(
        long,
        env = "STATSD_BRIDGE_SUMMARY_SIG_FIG",
        default_value_t = 3,
        value_parser = clap::value_parser!(u8).range(0..=5)
    )]
    summary_sig_fig: u8,

    /// Log filter, overridden by `RUST_LOG`.
    #[arg(long, env = "STATSD_BRIDGE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Clone)]
struct Exposition {
    registry: Arc<Registry>,
    stats: Arc<BridgeStats>,
}

async fn metrics(State(exposition): State<Exposition>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        render_text(&exposition.registry, &exposition.stats),
    )
}

async fn index() -> &'static str {
    "StatsD bridge. Metrics are served at /metrics.\n"
}

fn serve(address: SocketAddr, bridge: &StatsdBridge) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;
    let app = Router::new()
        .route("/", get(index))
        .route("/metrics", get(metrics))
        .with_state(Exposition {
            registry: bridge.registry(),
            stats: bridge.stats(),
        });

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(address).await?;
        info!("Accepting Prometheus requests on {address}");
        axum::serve(listener, app).await
    })
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    info!("Starting StatsD -> Prometheus bridge");
    let summary_sig_fig = match SigFig::new(cli.summary_sig_fig) {
        Ok(sig_fig) => sig_fig,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let options = BridgeOptions {
        statsd_address: cli.statsd_listening_address,
        mapping_config: cli.mapping_config,
        summary_flush_interval: Duration::from_secs(cli.summary_flush_interval),
        queue_capacity: cli.queue_capacity,
        summary_sig_fig,
    };

    let bridge = match StatsdBridge::start(options) {
        Ok(bridge) => bridge,
        Err(err) => {
            error!("Failed to start bridge: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = serve(cli.listening_address, &bridge) {
        error!("Exposition server on {} failed: {err}", cli.listening_address);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
