use std::path::PathBuf;

use thiserror::Error;

/// Errors that can stop the bridge from starting or a mapping from loading.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A custom error with a free-form message.
    #[error("Custom error: {0}")]
    Custom(String),

    /// An I/O error from the standard library.
    #[error("Std Io error: {0}")]
    StdIo(#[from] std::io::Error),

    /// The mapping configuration could not be read.
    #[error("Failed to read mapping config {path}: {source}")]
    MappingRead {
        /// Path of the mapping configuration.
        path: PathBuf,
        /// Underlying read failure.
        source: std::io::Error,
    },

    /// The mapping configuration did not compile.
    #[error("Invalid mapping config: {0}")]
    Mapping(#[from] MappingError),

    /// The config file watch could not be established.
    #[error("Config watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Failed to create a summary histogram.
    #[error("Histogram creation error: {0}")]
    HistogramCreation(#[from] hdrhistogram::errors::CreationError),
}

impl From<String> for BridgeError {
    fn from(value: String) -> Self {
        Self::Custom(value)
    }
}

impl From<&str> for BridgeError {
    fn from(value: &str) -> Self {
        Self::Custom(value.to_string())
    }
}

/// A structurally invalid mapping rule, with the line it was found on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct MappingError {
    /// 1-based line number in the mapping configuration.
    pub line: usize,
    /// What is wrong with the line.
    pub message: String,
}

impl MappingError {
    pub(crate) fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Reason a single StatsD line was skipped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseLineError {
    /// The line is not valid UTF-8.
    #[error("line is not valid utf-8")]
    InvalidUtf8,
    /// No `:` separating the bucket from the value.
    #[error("missing value separator")]
    MissingValue,
    /// The bucket name is empty.
    #[error("empty bucket name")]
    EmptyBucket,
    /// No `|type` component.
    #[error("missing metric type")]
    MissingType,
    /// The type tag is not one of `c`, `g`, `ms`, `s`.
    #[error("unknown metric type")]
    UnknownType,
    /// The value is not a finite number.
    #[error("invalid value")]
    InvalidValue,
    /// The sample rate is not a number in `(0, 1]`.
    #[error("invalid sample rate")]
    InvalidSampleRate,
    /// A trailing component is neither a sample rate nor a tag list.
    #[error("unknown line component")]
    UnknownComponent,
}

/// An update rejected by the aggregator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    /// Counters only go up.
    #[error("negative counter increment {value} for {name}")]
    NegativeCounter {
        /// Resolved metric name.
        name: String,
        /// The rejected increment.
        value: f64,
    },
    /// Summaries only accept finite, non-negative observations.
    #[error("invalid observation {value} for {name}")]
    InvalidObservation {
        /// Resolved metric name.
        name: String,
        /// The rejected observation.
        value: f64,
    },
    /// The name is already registered with another metric type.
    #[error("metric {name} is a {existing}, not a {requested}")]
    TypeConflict {
        /// Resolved metric name.
        name: String,
        /// Type the family was created with.
        existing: &'static str,
        /// Type of the rejected update.
        requested: &'static str,
    },
    /// The name belongs to the bridge's own metrics.
    #[error("metric name {name} is reserved")]
    ReservedName {
        /// Resolved metric name.
        name: String,
    },
    /// A label name the exposition format reserves for itself.
    #[error("label {label} is reserved on {name}")]
    ReservedLabel {
        /// Resolved metric name.
        name: String,
        /// The offending label name.
        label: String,
    },
}
