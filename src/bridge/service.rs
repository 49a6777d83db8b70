//! Wiring of the bridge threads and their lifecycle.

use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Sender};
use tracing::{error, info};

use super::aggregator::Aggregator;
use super::flusher::spawn_summary_flusher;
use super::listener::StatsdListener;
use super::mapper::{MapperHandle, MetricMapper};
use super::protocol::Event;
use super::registry::{Registry, SigFig};
use super::stats::BridgeStats;
use super::watcher::ConfigWatcher;
use crate::BridgeResult;

/// Reference capacity of the event queue between the listener and the aggregator.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default period between summary window resets.
pub const DEFAULT_SUMMARY_FLUSH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Configuration options for the bridge.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// UDP address StatsD traffic is received on.
    pub statsd_address: SocketAddr,
    /// Mapping configuration file. Without it every bucket maps to its sanitized name.
    pub mapping_config: Option<PathBuf>,
    /// How often summary windows are reset.
    pub summary_flush_interval: Duration,
    /// Events that may be pending before the listener blocks.
    pub queue_capacity: usize,
    /// Histogram precision of summaries.
    pub summary_sig_fig: SigFig,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            statsd_address: SocketAddr::from(([0, 0, 0, 0], 9125)),
            mapping_config: None,
            summary_flush_interval: DEFAULT_SUMMARY_FLUSH_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            summary_sig_fig: SigFig::default(),
        }
    }
}

/// A running StatsD to Prometheus bridge.
///
/// Owns the listener, aggregator, summary flusher and config watcher threads. Dropping the
/// bridge stops and joins all of them; events still queued are applied first.
///
/// # Example
///
/// ```no_run
/// use statsd_bridge::{BridgeOptions, StatsdBridge};
///
/// let bridge = StatsdBridge::start(BridgeOptions::default()).expect("bridge should start");
/// let text = bridge.render();
/// println!("{text}");
/// ```
pub struct StatsdBridge {
    registry: Arc<Registry>,
    stats: Arc<BridgeStats>,
    mapper: MapperHandle,
    local_addr: SocketAddr,
    shutdown: Option<Sender<()>>,
    // only used in cold path
    handles: Vec<JoinHandle<()>>,
}

impl StatsdBridge {
    /// Binds the StatsD socket, loads the mapping and spawns the worker threads.
    ///
    /// # Errors
    /// Fails if the socket cannot be bound, the initial mapping does not load, or the mapping
    /// file cannot be watched.
    pub fn start(options: BridgeOptions) -> BridgeResult<Self> {
        let socket = UdpSocket::bind(options.statsd_address)?;
        let local_addr = socket.local_addr()?;

        let mapper = match &options.mapping_config {
            Some(path) => {
                let mapper = MapperHandle::from_file(path)?;
                info!(
                    "Loaded mapping config {} with {} rule(s)",
                    path.display(),
                    mapper.snapshot().rules().len()
                );
                mapper
            }
            None => MapperHandle::new(MetricMapper::default()),
        };
        let watcher = options
            .mapping_config
            .as_deref()
            .map(ConfigWatcher::new)
            .transpose()?;

        let registry = Arc::new(Registry::new(options.summary_sig_fig));
        let stats = Arc::new(BridgeStats::default());
        let listener = StatsdListener::new(socket, Arc::clone(&stats))?;

        let (shutdown, shutdown_rx) = unbounded::<()>();
        let (events_tx, events_rx) = bounded::<Event>(options.queue_capacity);
        let mut handles = Vec::with_capacity(4);

        let aggregator = Aggregator::new(mapper.clone(), Arc::clone(&registry), Arc::clone(&stats));
        handles.push(spawn_named("aggregator", move || aggregator.run(&events_rx))?);

        let listener_shutdown = shutdown_rx.clone();
        handles.push(spawn_named("statsd-listener", move || {
            listener.run(&events_tx, &listener_shutdown);
        })?);

        handles.push(spawn_summary_flusher(
            Arc::clone(&registry),
            Arc::clone(&stats),
            options.summary_flush_interval,
            shutdown_rx.clone(),
        )?);

        if let Some(watcher) = watcher {
            let mapper = mapper.clone();
            let stats = Arc::clone(&stats);
            handles.push(spawn_named("config-watcher", move || {
                watcher.run(&mapper, &stats, &shutdown_rx);
            })?);
        }

        info!("Accepting StatsD traffic on {local_addr}");
        Ok(Self {
            registry,
            stats,
            mapper,
            local_addr,
            shutdown: Some(shutdown),
            handles,
        })
    }

    /// Address the StatsD socket is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The metric registry, for exposition.
    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// The bridge's own counters.
    #[must_use]
    pub fn stats(&self) -> Arc<BridgeStats> {
        Arc::clone(&self.stats)
    }

    /// Handle to the mapper currently in effect.
    #[must_use]
    pub fn mapper(&self) -> MapperHandle {
        self.mapper.clone()
    }

    /// Renders all bridged series followed by the bridge's own counters.
    #[must_use]
    pub fn render(&self) -> String {
        render_text(&self.registry, &self.stats)
    }

    /// Stops all threads, applying events that are already queued.
    pub fn shutdown(self) {
        drop(self);
    }
}

/// Prometheus text exposition of `registry` and `stats`.
#[must_use]
pub fn render_text(registry: &Registry, stats: &BridgeStats) -> String {
    let mut out = String::with_capacity(4096);
    registry.render(&mut out);
    stats.render(&mut out);
    out
}

fn spawn_named(
    name: &str,
    f: impl FnOnce() + Send + 'static,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new().name(name.to_owned()).spawn(f)
}

impl Drop for StatsdBridge {
    fn drop(&mut self) {
        // Closing the channel is the stop signal for every thread; the aggregator follows once
        // the listener has dropped the event sender.
        drop(self.shutdown.take());

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Bridge thread panicked");
            }
        }
    }
}
