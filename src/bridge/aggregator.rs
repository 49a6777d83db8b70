//! The single writer applying decoded events to the registry.

use std::sync::Arc;

use crossbeam::channel::Receiver;
use tracing::{debug, info, trace};

use super::mapper::MapperHandle;
use super::protocol::Event;
use super::registry::{Registry, SeriesKey};
use super::stats::BridgeStats;
use crate::RecordError;

/// Sole writer of metric values.
///
/// Resolves each event's bucket against one snapshot of the current mapper and applies the
/// update to the registry. Events are applied strictly in the order they are received.
pub struct Aggregator {
    mapper: MapperHandle,
    registry: Arc<Registry>,
    stats: Arc<BridgeStats>,
}

impl Aggregator {
    /// Creates an aggregator writing into `registry`.
    #[must_use]
    pub const fn new(
        mapper: MapperHandle,
        registry: Arc<Registry>,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            mapper,
            registry,
            stats,
        }
    }

    /// Applies one event.
    ///
    /// Rejections are counted in [`BridgeStats`] and reported back; they never stop the caller.
    ///
    /// # Errors
    /// Returns the [`RecordError`] when the registry refuses the update.
    pub fn apply(&self, event: Event) -> Result<(), RecordError> {
        let (bucket, tags) = match &event {
            Event::Set { bucket, .. } => {
                trace!("Ignoring set event for {bucket}");
                BridgeStats::incr(&self.stats.ignored_sets);
                return Ok(());
            }
            other => (other.bucket(), other.tags()),
        };

        let id = self.mapper.snapshot().resolve(bucket);
        let mut labels = tags.clone();
        labels.extend(id.labels);
        let key = SeriesKey::new(id.name, labels);

        let result = match event {
            Event::Counter { value, .. } => self.registry.counter_add(key, value),
            Event::Gauge {
                value,
                relative: true,
                ..
            } => self.registry.gauge_add(key, value),
            Event::Gauge { value, .. } => self.registry.gauge_set(key, value),
            Event::Observer { value, .. } => self.registry.observe(key, value),
            Event::Set { .. } => Ok(()),
        };

        match &result {
            Ok(()) => BridgeStats::incr(&self.stats.events),
            Err(err) => {
                debug!("Rejected event: {err}");
                let counter = match err {
                    RecordError::NegativeCounter { .. } => &self.stats.negative_counters,
                    RecordError::InvalidObservation { .. } => &self.stats.invalid_observations,
                    RecordError::TypeConflict { .. } => &self.stats.type_conflicts,
                    RecordError::ReservedName { .. } => &self.stats.reserved_names,
                    RecordError::ReservedLabel { .. } => &self.stats.reserved_labels,
                };
                BridgeStats::incr(counter);
            }
        }
        result
    }

    /// Drains `events` until every sender is gone.
    pub fn run(&self, events: &Receiver<Event>) {
        for event in events {
            let _ = self.apply(event);
        }
        info!("Event queue closed, aggregator stopped");
    }
}
