//! In-process store of bridged series and their Prometheus text rendering.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::bridge::Labels;
use crate::{BridgeError, RecordError};

/// Quantiles exposed for every summary.
pub const QUANTILES: [f64; 3] = [0.5, 0.9, 0.99];

/// Observations are recorded in the histogram with this many steps per unit.
const VALUE_SCALE: f64 = 1000.0;

/// Scaled observations at or above this do not fit the histogram's `u64` values.
#[allow(clippy::cast_precision_loss)]
const MAX_SCALED: f64 = u64::MAX as f64;

/// Prefix of the bridge's own metrics, never accepted from clients.
pub const SELF_METRIC_PREFIX: &str = "statsd_bridge_";

/// Series every summary emits next to its quantiles.
const SUMMARY_SUFFIXES: [&str; 2] = ["_sum", "_count"];

/// Label the summary quantile lines carry.
const QUANTILE_LABEL: &str = "quantile";

/// Largest accepted [`SigFig`].
pub const SIG_FIG_MAX: u8 = 5;
/// Default [`SigFig`].
pub const SIG_FIG_DEF: u8 = 3;
const _: () = assert!(SIG_FIG_DEF <= SIG_FIG_MAX);

/// Number of significant figures for summary precision (0..=5).
///
/// Higher values increase precision but also memory usage.
/// Use [`SigFig::default()`] for the default value of 3.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SigFig {
    value: u8,
}

impl SigFig {
    /// Creates a new `SigFig` with the given number of significant figures (0..=5).
    ///
    /// # Errors
    /// Returns [`BridgeError`] if `value` exceeds 5.
    pub fn new(value: u8) -> Result<Self, BridgeError> {
        if value > SIG_FIG_MAX {
            return Err(BridgeError::from(
                "Invalid sig fig: must be 0, 1, 2, 3, 4 or 5",
            ));
        }
        Ok(Self { value })
    }
    /// Returns the number of significant figures.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.value
    }
}

impl Default for SigFig {
    fn default() -> Self {
        Self { value: SIG_FIG_DEF }
    }
}

/// An `f64` stored as its bit pattern, so readers never see a torn value.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    /// Current value.
    #[must_use]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Replaces the value.
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    /// Adds `delta` to the value.
    pub fn add(&self, delta: f64) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }
}

/// Identity of one time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    /// Metric name.
    pub name: String,
    /// Label set.
    pub labels: Labels,
}

impl SeriesKey {
    /// Creates a key from a name and labels.
    #[must_use]
    pub fn new(name: impl Into<String>, labels: Labels) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }
}

/// Type of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic counter.
    Counter,
    /// Gauge.
    Gauge,
    /// Windowed summary.
    Summary,
}

impl MetricKind {
    /// Name used in `# TYPE` lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Summary => "summary",
        }
    }
}

struct SummaryState {
    window: Histogram<u64>,
    sum: f64,
    count: u64,
}

/// Windowed quantile estimator with cumulative sum and count.
pub struct Summary {
    state: Mutex<SummaryState>,
}

/// Point-in-time reading of a [`Summary`].
#[derive(Debug, Clone, PartialEq)]
pub struct SummarySnapshot {
    /// `(quantile, value)` pairs for [`QUANTILES`]; `NaN` when the window is empty.
    pub quantiles: Vec<(f64, f64)>,
    /// Observations in the current window.
    pub window_count: u64,
    /// Sum of all observations since creation.
    pub sum: f64,
    /// Number of observations since creation.
    pub count: u64,
}

impl Summary {
    fn new(sig_fig: SigFig) -> Result<Self, BridgeError> {
        Ok(Self {
            state: Mutex::new(SummaryState {
                window: Histogram::new(sig_fig.value())?,
                sum: 0.0,
                count: 0,
            }),
        })
    }

    fn observe(&self, value: f64) -> Result<(), hdrhistogram::RecordError> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = (value * VALUE_SCALE).round() as u64;
        let mut state = self.state.lock();
        state.window.record(scaled)?;
        state.sum += value;
        state.count += 1;
        Ok(())
    }

    /// Discards the current window; sum and count keep accumulating.
    fn reset_window(&self) {
        self.state.lock().window.reset();
    }

    fn snapshot(&self) -> SummarySnapshot {
        let state = self.state.lock();
        let empty = state.window.is_empty();
        let quantiles = QUANTILES
            .iter()
            .map(|&q| {
                #[allow(clippy::cast_precision_loss)]
                let value = if empty {
                    f64::NAN
                } else {
                    let raw = state.window.value_at_quantile(q);
                    state.window.lowest_equivalent(raw) as f64 / VALUE_SCALE
                };
                (q, value)
            })
            .collect();
        SummarySnapshot {
            quantiles,
            window_count: state.window.len(),
            sum: state.sum,
            count: state.count,
        }
    }
}

/// Thread-safe store of every bridged series.
///
/// Families are created lazily on first update and never removed. A metric name keeps the type
/// it was first created with. Names under [`SELF_METRIC_PREFIX`], names clashing with a summary's
/// `_sum`/`_count` series and reserved label names are refused, so one bad client cannot make the
/// exposition unparseable.
pub struct Registry {
    families: DashMap<String, MetricKind>,
    counters: DashMap<SeriesKey, AtomicF64>,
    gauges: DashMap<SeriesKey, AtomicF64>,
    summaries: DashMap<SeriesKey, Summary>,
    sig_fig: SigFig,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(SigFig::default())
    }
}

impl Registry {
    /// Creates an empty registry whose summaries use `sig_fig` significant figures.
    #[must_use]
    pub fn new(sig_fig: SigFig) -> Self {
        Self {
            families: DashMap::new(),
            counters: DashMap::new(),
            gauges: DashMap::new(),
            summaries: DashMap::new(),
            sig_fig,
        }
    }

    fn claim(&self, key: &SeriesKey, kind: MetricKind) -> Result<(), RecordError> {
        let name = key.name.as_str();
        let reserved = key.labels.keys().find(|label| {
            label.starts_with("__") || (kind == MetricKind::Summary && *label == QUANTILE_LABEL)
        });
        if let Some(label) = reserved {
            return Err(RecordError::ReservedLabel {
                name: name.to_owned(),
                label: label.clone(),
            });
        }

        let found = self.families.get(name).map(|existing| *existing);
        let existing = match found {
            Some(existing) => existing,
            None => {
                self.check_new_family(name, kind)?;
                *self.families.entry(name.to_owned()).or_insert(kind)
            }
        };
        if existing == kind {
            Ok(())
        } else {
            Err(type_conflict(name, existing, kind))
        }
    }

    /// Rejects names that would collide with series the exposition already emits.
    fn check_new_family(&self, name: &str, kind: MetricKind) -> Result<(), RecordError> {
        if name.starts_with(SELF_METRIC_PREFIX) {
            return Err(RecordError::ReservedName {
                name: name.to_owned(),
            });
        }
        for suffix in SUMMARY_SUFFIXES {
            let owner = name.strip_suffix(suffix);
            if owner.is_some_and(|owner| {
                self.families
                    .get(owner)
                    .is_some_and(|existing| *existing == MetricKind::Summary)
            }) {
                return Err(type_conflict(name, MetricKind::Summary, kind));
            }
            if kind == MetricKind::Summary {
                let derived = format!("{name}{suffix}");
                let found = self.families.get(&derived).map(|existing| *existing);
                if let Some(existing) = found {
                    return Err(type_conflict(&derived, existing, kind));
                }
            }
        }
        Ok(())
    }

    /// Adds `value` to a counter.
    ///
    /// # Errors
    /// Rejects negative increments, reserved names or labels, and names registered with another
    /// type.
    pub fn counter_add(&self, key: SeriesKey, value: f64) -> Result<(), RecordError> {
        if value < 0.0 {
            return Err(RecordError::NegativeCounter {
                name: key.name,
                value,
            });
        }
        self.claim(&key, MetricKind::Counter)?;
        self.counters.entry(key).or_default().add(value);
        Ok(())
    }

    /// Sets a gauge to `value`.
    ///
    /// # Errors
    /// Rejects reserved names or labels and names registered with another type.
    pub fn gauge_set(&self, key: SeriesKey, value: f64) -> Result<(), RecordError> {
        self.claim(&key, MetricKind::Gauge)?;
        self.gauges.entry(key).or_default().store(value);
        Ok(())
    }

    /// Adds a signed `delta` to a gauge. A new gauge starts at zero.
    ///
    /// # Errors
    /// Rejects reserved names or labels and names registered with another type.
    pub fn gauge_add(&self, key: SeriesKey, delta: f64) -> Result<(), RecordError> {
        self.claim(&key, MetricKind::Gauge)?;
        self.gauges.entry(key).or_default().add(delta);
        Ok(())
    }

    /// Records an observation into a summary.
    ///
    /// # Errors
    /// Rejects negative or unrecordable values, reserved names or labels, and names registered
    /// with another type.
    pub fn observe(&self, key: SeriesKey, value: f64) -> Result<(), RecordError> {
        if !value.is_finite() || value < 0.0 || value * VALUE_SCALE >= MAX_SCALED {
            return Err(RecordError::InvalidObservation {
                name: key.name,
                value,
            });
        }
        self.claim(&key, MetricKind::Summary)?;

        let invalid = |name: &str| RecordError::InvalidObservation {
            name: name.to_owned(),
            value,
        };
        if let Some(summary) = self.summaries.get(&key) {
            return summary.observe(value).map_err(|_| invalid(&key.name));
        }
        let name = key.name.clone();
        let summary = self
            .summaries
            .entry(key)
            .or_try_insert_with(|| Summary::new(self.sig_fig))
            .map_err(|_| invalid(&name))?;
        summary.observe(value).map_err(|_| invalid(&name))
    }

    /// Resets the observation window of every summary. Returns how many were reset.
    pub fn flush_summaries(&self) -> usize {
        let mut flushed = 0;
        for summary in &self.summaries {
            summary.reset_window();
            flushed += 1;
        }
        flushed
    }

    /// Current value of a counter.
    #[must_use]
    pub fn counter_value(&self, name: &str, labels: &Labels) -> Option<f64> {
        let key = SeriesKey::new(name, labels.clone());
        self.counters.get(&key).map(|v| v.load())
    }

    /// Current value of a gauge.
    #[must_use]
    pub fn gauge_value(&self, name: &str, labels: &Labels) -> Option<f64> {
        let key = SeriesKey::new(name, labels.clone());
        self.gauges.get(&key).map(|v| v.load())
    }

    /// Current reading of a summary.
    #[must_use]
    pub fn summary_snapshot(&self, name: &str, labels: &Labels) -> Option<SummarySnapshot> {
        let key = SeriesKey::new(name, labels.clone());
        self.summaries.get(&key).map(|s| s.snapshot())
    }

    /// Number of distinct series across all types.
    #[must_use]
    pub fn series_count(&self) -> usize {
        self.counters.len() + self.gauges.len() + self.summaries.len()
    }

    /// Appends the Prometheus text exposition of every series, grouped and sorted by name.
    pub fn render(&self, out: &mut String) {
        let mut samples: Vec<(SeriesKey, MetricKind, Sample)> =
            Vec::with_capacity(self.series_count());
        for entry in &self.counters {
            samples.push((entry.key().clone(), MetricKind::Counter, Sample::Value(entry.load())));
        }
        for entry in &self.gauges {
            samples.push((entry.key().clone(), MetricKind::Gauge, Sample::Value(entry.load())));
        }
        for entry in &self.summaries {
            samples.push((
                entry.key().clone(),
                MetricKind::Summary,
                Sample::Summary(entry.snapshot()),
            ));
        }
        samples.sort_by(|a, b| a.0.cmp(&b.0));

        let mut current: Option<&str> = None;
        for (key, kind, sample) in &samples {
            if current != Some(key.name.as_str()) {
                let _ = writeln!(out, "# TYPE {} {}", key.name, kind.as_str());
                current = Some(key.name.as_str());
            }
            match sample {
                Sample::Value(value) => write_sample(out, &key.name, &key.labels, None, *value),
                Sample::Summary(snapshot) => {
                    for &(q, value) in &snapshot.quantiles {
                        write_sample(out, &key.name, &key.labels, Some(q), value);
                    }
                    let sum_name = format!("{}_sum", key.name);
                    write_sample(out, &sum_name, &key.labels, None, snapshot.sum);
                    let count_name = format!("{}_count", key.name);
                    #[allow(clippy::cast_precision_loss)]
                    let count = snapshot.count as f64;
                    write_sample(out, &count_name, &key.labels, None, count);
                }
            }
        }
    }
}

fn type_conflict(name: &str, existing: MetricKind, requested: MetricKind) -> RecordError {
    RecordError::TypeConflict {
        name: name.to_owned(),
        existing: existing.as_str(),
        requested: requested.as_str(),
    }
}

enum Sample {
    Value(f64),
    Summary(SummarySnapshot),
}

fn write_sample(out: &mut String, name: &str, labels: &Labels, quantile: Option<f64>, value: f64) {
    out.push_str(name);
    if !labels.is_empty() || quantile.is_some() {
        out.push('{');
        let mut first = true;
        for (label, label_value) in labels {
            if !first {
                out.push(',');
            }
            first = false;
            out.push_str(label);
            out.push_str("=\"");
            escape_label_value(out, label_value);
            out.push('"');
        }
        if let Some(q) = quantile {
            if !first {
                out.push(',');
            }
            let _ = write!(out, "quantile=\"{q}\"");
        }
        out.push('}');
    }
    out.push(' ');
    write_value(out, value);
    out.push('\n');
}

fn write_value(out: &mut String, value: f64) {
    if value.is_nan() {
        out.push_str("NaN");
    } else if value == f64::INFINITY {
        out.push_str("+Inf");
    } else if value == f64::NEG_INFINITY {
        out.push_str("-Inf");
    } else {
        let _ = write!(out, "{value}");
    }
}

fn escape_label_value(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}
