//! Periodic reset of summary quantile windows.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{tick, Receiver};
use crossbeam::select;
use tracing::{debug, info};

use super::registry::Registry;
use super::stats::BridgeStats;

/// Resets every summary window on a fixed period until `shutdown` is closed.
pub fn run_summary_flusher(
    registry: &Registry,
    stats: &BridgeStats,
    interval: Duration,
    shutdown: &Receiver<()>,
) {
    let ticker = tick(interval);
    let mut finish = false;
    while !finish {
        select! {
            recv(ticker) -> _ => {
                let flushed = registry.flush_summaries();
                BridgeStats::incr(&stats.summary_flushes);
                debug!("Reset {flushed} summary window(s)");
            },
            // closed on shutdown
            recv(shutdown) -> _ => {
                finish = true;
            },
        }
    }
    info!("Summary flusher stopped");
}

/// Spawns [`run_summary_flusher`] on its own thread.
pub fn spawn_summary_flusher(
    registry: Arc<Registry>,
    stats: Arc<BridgeStats>,
    interval: Duration,
    shutdown: Receiver<()>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("summary-flusher".to_owned())
        .spawn(move || run_summary_flusher(&registry, &stats, interval, &shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::registry::SeriesKey;
    use crate::bridge::Labels;
    use crossbeam::channel::unbounded;

    #[test]
    fn test_flusher_resets_windows_until_shutdown() {
        let registry = Arc::new(Registry::default());
        let stats = Arc::new(BridgeStats::default());
        registry
            .observe(SeriesKey::new("lat", Labels::new()), 500.0)
            .unwrap();

        let (shutdown_tx, shutdown_rx) = unbounded::<()>();
        let handle = spawn_summary_flusher(
            Arc::clone(&registry),
            Arc::clone(&stats),
            Duration::from_millis(20),
            shutdown_rx,
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(200));
        drop(shutdown_tx);
        handle.join().unwrap();

        assert!(stats.summary_flushes() >= 1);
        let snapshot = registry.summary_snapshot("lat", &Labels::new()).unwrap();
        assert_eq!(snapshot.window_count, 0);
        assert_eq!(snapshot.count, 1);
    }
}
