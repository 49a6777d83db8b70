//! # statsd-bridge
//!
//! Receives StatsD metrics over UDP and keeps them in a registry that can be scraped in the
//! Prometheus text exposition format.
//!
//! ## Features
//!
//! - **StatsD decoding**: counters, gauges (absolute and relative), timers and sets, with sample
//!   rates and DogStatsD-style tags
//! - **Metric mapping**: ordered, first-match-wins rules translating dot-separated buckets into
//!   metric names and labels, hot-reloaded when the mapping file changes
//! - **Single-writer aggregation**: one aggregator thread applies every event in order, fed by a
//!   bounded queue that blocks the receiver instead of dropping events
//! - **Windowed summaries**: timer quantiles are computed over a window reset on a fixed period
//!
//! ## Quick Start
//!
//! ```no_run
//! use statsd_bridge::{BridgeOptions, StatsdBridge};
//! use std::time::Duration;
//!
//! let options = BridgeOptions {
//!     statsd_address: "127.0.0.1:9125".parse().unwrap(),
//!     mapping_config: Some("mapping.conf".into()),
//!     summary_flush_interval: Duration::from_secs(60),
//!     ..BridgeOptions::default()
//! };
//!
//! let bridge = StatsdBridge::start(options).expect("bridge should start");
//! // serve this from an HTTP endpoint
//! let exposition = bridge.render();
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![warn(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

// https://github.com/statsd/statsd/blob/master/docs/metric_types.md
mod bridge;
mod error;

pub use bridge::aggregator::Aggregator;
pub use bridge::mapper::{MapperHandle, MappingRule, MetricId, MetricMapper, ReloadOutcome};
pub use bridge::protocol::{Event, ParseEvents};
pub use bridge::registry::{
    MetricKind, Registry, SeriesKey, SigFig, SummarySnapshot, QUANTILES, SELF_METRIC_PREFIX,
};
pub use bridge::service::{
    render_text, BridgeOptions, StatsdBridge, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_SUMMARY_FLUSH_INTERVAL,
};
pub use bridge::stats::BridgeStats;
pub use bridge::{sanitize_label_name, sanitize_metric_name, Labels};
pub use error::{BridgeError, MappingError, ParseLineError, RecordError};

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
