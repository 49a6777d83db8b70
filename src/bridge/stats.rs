//! Counters about the bridge itself.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::bridge::mapper::ReloadOutcome;

/// Counters describing the bridge's own health, exposed next to the bridged metrics.
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub(crate) udp_packets: AtomicU64,
    pub(crate) lines: AtomicU64,
    pub(crate) invalid_lines: AtomicU64,
    pub(crate) events: AtomicU64,
    pub(crate) negative_counters: AtomicU64,
    pub(crate) invalid_observations: AtomicU64,
    pub(crate) type_conflicts: AtomicU64,
    pub(crate) reserved_names: AtomicU64,
    pub(crate) reserved_labels: AtomicU64,
    pub(crate) ignored_sets: AtomicU64,
    pub(crate) reloads_success: AtomicU64,
    pub(crate) reloads_failure: AtomicU64,
    pub(crate) summary_flushes: AtomicU64,
}

impl BridgeStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reload(&self, outcome: ReloadOutcome) {
        match outcome {
            ReloadOutcome::Success => Self::incr(&self.reloads_success),
            ReloadOutcome::Failure => Self::incr(&self.reloads_failure),
        }
    }

    /// UDP datagrams received.
    #[must_use]
    pub fn udp_packets(&self) -> u64 {
        self.udp_packets.load(Ordering::Relaxed)
    }

    /// Lines skipped because they did not decode.
    #[must_use]
    pub fn invalid_lines(&self) -> u64 {
        self.invalid_lines.load(Ordering::Relaxed)
    }

    /// Events applied to the registry.
    #[must_use]
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Counter events rejected for a negative increment.
    #[must_use]
    pub fn negative_counters(&self) -> u64 {
        self.negative_counters.load(Ordering::Relaxed)
    }

    /// Events rejected because their name is registered with another type.
    #[must_use]
    pub fn type_conflicts(&self) -> u64 {
        self.type_conflicts.load(Ordering::Relaxed)
    }

    /// Events rejected for a reserved metric or label name.
    #[must_use]
    pub fn reserved(&self) -> u64 {
        self.reserved_names.load(Ordering::Relaxed)
            + self.reserved_labels.load(Ordering::Relaxed)
    }

    /// Set events received and dropped.
    #[must_use]
    pub fn ignored_sets(&self) -> u64 {
        self.ignored_sets.load(Ordering::Relaxed)
    }

    /// Mapping reloads with the given outcome.
    #[must_use]
    pub fn reloads(&self, outcome: ReloadOutcome) -> u64 {
        match outcome {
            ReloadOutcome::Success => self.reloads_success.load(Ordering::Relaxed),
            ReloadOutcome::Failure => self.reloads_failure.load(Ordering::Relaxed),
        }
    }

    /// Completed summary window resets.
    #[must_use]
    pub fn summary_flushes(&self) -> u64 {
        self.summary_flushes.load(Ordering::Relaxed)
    }

    pub(crate) fn render(&self, out: &mut String) {
        let mut buffer = itoa::Buffer::new();
        let mut counter = |name: &str, help: &str, samples: &[(&str, &AtomicU64)]| {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            for (labels, value) in samples {
                out.push_str(name);
                out.push_str(labels);
                out.push(' ');
                out.push_str(buffer.format(value.load(Ordering::Relaxed)));
                out.push('\n');
            }
        };

        counter(
            "statsd_bridge_udp_packets_total",
            "StatsD datagrams received.",
            &[("", &self.udp_packets)],
        );
        counter(
            "statsd_bridge_lines_total",
            "StatsD lines decoded, valid or not.",
            &[("", &self.lines)],
        );
        counter(
            "statsd_bridge_invalid_lines_total",
            "StatsD lines skipped because they did not decode.",
            &[("", &self.invalid_lines)],
        );
        counter(
            "statsd_bridge_events_total",
            "Events applied to the registry.",
            &[("", &self.events)],
        );
        counter(
            "statsd_bridge_rejected_events_total",
            "Events rejected by the aggregator.",
            &[
                ("{reason=\"negative_counter\"}", &self.negative_counters),
                ("{reason=\"invalid_observation\"}", &self.invalid_observations),
                ("{reason=\"type_conflict\"}", &self.type_conflicts),
                ("{reason=\"reserved_name\"}", &self.reserved_names),
                ("{reason=\"reserved_label\"}", &self.reserved_labels),
                ("{reason=\"set\"}", &self.ignored_sets),
            ],
        );
        counter(
            "statsd_bridge_config_reloads_total",
            "Mapping configuration reloads by outcome.",
            &[
                ("{outcome=\"success\"}", &self.reloads_success),
                ("{outcome=\"failure\"}", &self.reloads_failure),
            ],
        );
        counter(
            "statsd_bridge_summary_flushes_total",
            "Summary window resets.",
            &[("", &self.summary_flushes)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_stats() {
        let stats = BridgeStats::default();
        BridgeStats::incr(&stats.udp_packets);
        stats.record_reload(ReloadOutcome::Failure);
        stats.record_reload(ReloadOutcome::Failure);

        let mut out = String::new();
        stats.render(&mut out);
        assert!(out.contains("# TYPE statsd_bridge_udp_packets_total counter\n"));
        assert!(out.contains("statsd_bridge_udp_packets_total 1\n"));
        assert!(out.contains("statsd_bridge_config_reloads_total{outcome=\"failure\"} 2\n"));
        assert!(out.contains("statsd_bridge_config_reloads_total{outcome=\"success\"} 0\n"));
        assert_eq!(stats.reloads(ReloadOutcome::Failure), 2);
    }
}
