//! Mapping file watch that re-registers itself after every change.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam::channel::{tick, unbounded, Receiver};
use crossbeam::select;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use super::mapper::MapperHandle;
use super::stats::BridgeStats;
use crate::BridgeResult;

/// How often a lost watch registration is retried.
const REARM_RETRY_INTERVAL: Duration = Duration::from_secs(1);

type WatchEvents = Receiver<notify::Result<notify::Event>>;

/// Watches the mapping configuration file and reloads the mapper on every change.
pub struct ConfigWatcher {
    path: PathBuf,
    watcher: RecommendedWatcher,
    events: WatchEvents,
}

impl ConfigWatcher {
    /// Establishes the initial watch on `path`.
    ///
    /// # Errors
    /// Fails if the watch cannot be registered; without it no reload would ever happen.
    pub fn new(path: &Path) -> BridgeResult<Self> {
        let (sender, events) = unbounded();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = sender.send(res);
        })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        Ok(Self {
            path: path.to_owned(),
            watcher,
            events,
        })
    }

    /// Runs until `shutdown` is closed.
    pub fn run(self, mapper: &MapperHandle, stats: &BridgeStats, shutdown: &Receiver<()>) {
        let Self {
            path,
            mut watcher,
            events,
        } = self;
        let rearm = || {
            // Editors that save by rename leave the old registration pointing at a dead inode.
            let _ = watcher.unwatch(&path);
            watcher.watch(&path, RecursiveMode::NonRecursive)
        };
        supervise(
            &path,
            &events,
            rearm,
            mapper,
            stats,
            shutdown,
            REARM_RETRY_INTERVAL,
        );
        info!("Config watcher stopped");
    }
}

/// The watch loop: re-registers interest before every reload, retries a lost registration on
/// `retry_interval`, and never exits on a watch error.
fn supervise(
    path: &Path,
    events: &WatchEvents,
    mut rearm: impl FnMut() -> notify::Result<()>,
    mapper: &MapperHandle,
    stats: &BridgeStats,
    shutdown: &Receiver<()>,
    retry_interval: Duration,
) {
    let retry = tick(retry_interval);
    let mut armed = true;
    let reload = || {
        let outcome = mapper.reload(path);
        stats.record_reload(outcome);
    };

    let mut finish = false;
    while !finish {
        select! {
            recv(events) -> msg => match msg {
                Ok(Ok(event)) => match event.kind {
                    EventKind::Access(_) => {}
                    EventKind::Remove(_) => {
                        // a replacement may already be in place
                        armed = try_rearm(path, &mut rearm);
                        if armed {
                            reload();
                        }
                    }
                    kind => {
                        info!("Config file changed ({kind:?}), attempting reload");
                        armed = try_rearm(path, &mut rearm);
                        reload();
                    }
                },
                Ok(Err(err)) => warn!("Error watching config: {err}"),
                Err(_) => finish = true,
            },
            recv(retry) -> _ => {
                if !armed {
                    armed = try_rearm(path, &mut rearm);
                    if armed {
                        info!("Watch on {} restored, attempting reload", path.display());
                        reload();
                    }
                }
            },
            // closed on shutdown
            recv(shutdown) -> _ => {
                finish = true;
            },
        }
    }
}

fn try_rearm(path: &Path, rearm: &mut impl FnMut() -> notify::Result<()>) -> bool {
    match rearm() {
        Ok(()) => true,
        Err(err) => {
            warn!("Failed to re-watch {}: {err}", path.display());
            false
        }
    }
}
