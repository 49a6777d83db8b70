//! Decoding of the StatsD line protocol.
//!
//! A datagram holds one or more lines of the form
//!
//! ```text
//! <bucket>:<value>|<type>[|@<sample_rate>][|#<tag>:<value>,...]
//! ```
//!
//! where `<type>` is one of `c` (counter), `g` (gauge), `ms` (timer) or `s` (set).

use crate::bridge::{sanitize_label_name, Labels};
use crate::ParseLineError;

/// A single decoded StatsD sample, keyed by its raw bucket name.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Increment of a counter, already corrected for the sample rate.
    Counter {
        /// Raw dot-separated bucket name.
        bucket: String,
        /// Increment.
        value: f64,
        /// Labels from the DogStatsD tag extension.
        tags: Labels,
    },
    /// Absolute set or signed adjustment of a gauge.
    Gauge {
        /// Raw dot-separated bucket name.
        bucket: String,
        /// New value, or the delta when `relative` is set.
        value: f64,
        /// The value carried an explicit `+` or `-` sign.
        relative: bool,
        /// Labels from the DogStatsD tag extension.
        tags: Labels,
    },
    /// A timer observation, already corrected for the sample rate.
    Observer {
        /// Raw dot-separated bucket name.
        bucket: String,
        /// Observed value.
        value: f64,
        /// Labels from the DogStatsD tag extension.
        tags: Labels,
    },
    /// A set member. Parsed but otherwise inert.
    Set {
        /// Raw dot-separated bucket name.
        bucket: String,
        /// The raw member value.
        value: String,
        /// Labels from the DogStatsD tag extension.
        tags: Labels,
    },
}

impl Event {
    /// The raw bucket name this event was submitted under.
    #[must_use]
    pub fn bucket(&self) -> &str {
        match self {
            Self::Counter { bucket, .. }
            | Self::Gauge { bucket, .. }
            | Self::Observer { bucket, .. }
            | Self::Set { bucket, .. } => bucket,
        }
    }

    /// Labels attached on the wire.
    #[must_use]
    pub const fn tags(&self) -> &Labels {
        match self {
            Self::Counter { tags, .. }
            | Self::Gauge { tags, .. }
            | Self::Observer { tags, .. }
            | Self::Set { tags, .. } => tags,
        }
    }

    /// Parses a single line.
    ///
    /// # Errors
    /// Returns [`ParseLineError`] describing the first problem found in the line.
    ///
    /// # Example
    ///
    /// ```
    /// use statsd_bridge::Event;
    ///
    /// let event = Event::parse(b"foo:1|c|@0.1").expect("line should parse");
    /// assert!(matches!(event, Event::Counter { value, .. } if value == 10.0));
    /// ```
    pub fn parse(line: &[u8]) -> Result<Self, ParseLineError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseLineError::InvalidUtf8)?;
        parse_line(line.strip_suffix('\r').unwrap_or(line))
    }

    /// Lazily parses every line of a datagram.
    ///
    /// Empty lines are skipped; both `\n` and `\r\n` are accepted. A malformed line yields an
    /// `Err` and iteration continues with the next line.
    #[must_use]
    pub const fn parse_all(datagram: &[u8]) -> ParseEvents<'_> {
        ParseEvents { slice: datagram }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineType {
    Counter,
    Gauge,
    Timer,
    Set,
}

impl LineType {
    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "c" => Self::Counter,
            "g" => Self::Gauge,
            "ms" => Self::Timer,
            "s" => Self::Set,
            _ => return None,
        })
    }
}

fn parse_line(line: &str) -> Result<Event, ParseLineError> {
    let (bucket, rest) = line.split_once(':').ok_or(ParseLineError::MissingValue)?;
    if bucket.is_empty() {
        return Err(ParseLineError::EmptyBucket);
    }

    let mut components = rest.split('|');
    let raw_value = components.next().ok_or(ParseLineError::MissingValue)?;
    let ty = components
        .next()
        .ok_or(ParseLineError::MissingType)
        .and_then(|tag| LineType::from_tag(tag).ok_or(ParseLineError::UnknownType))?;

    let mut sample_rate = 1.0;
    let mut tags = Labels::new();
    for component in components {
        if let Some(rate) = component.strip_prefix('@') {
            sample_rate = parse_sample_rate(rate)?;
        } else if let Some(list) = component.strip_prefix('#') {
            parse_tags(list, &mut tags);
        } else {
            return Err(ParseLineError::UnknownComponent);
        }
    }

    let bucket = bucket.to_owned();
    Ok(match ty {
        LineType::Counter => Event::Counter {
            bucket,
            value: parse_value(raw_value)? / sample_rate,
            tags,
        },
        LineType::Gauge => Event::Gauge {
            bucket,
            value: parse_value(raw_value)?,
            relative: raw_value.starts_with(['+', '-']),
            tags,
        },
        LineType::Timer => Event::Observer {
            bucket,
            value: parse_value(raw_value)? / sample_rate,
            tags,
        },
        LineType::Set => {
            if raw_value.is_empty() {
                return Err(ParseLineError::InvalidValue);
            }
            Event::Set {
                bucket,
                value: raw_value.to_owned(),
                tags,
            }
        }
    })
}

fn parse_value(string: &str) -> Result<f64, ParseLineError> {
    match string.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ParseLineError::InvalidValue),
    }
}

fn parse_sample_rate(string: &str) -> Result<f64, ParseLineError> {
    match string.parse::<f64>() {
        Ok(rate) if rate > 0.0 && rate <= 1.0 => Ok(rate),
        _ => Err(ParseLineError::InvalidSampleRate),
    }
}

/// Parses tags in the format `tag1:value,tag2`. Tags without a value get `""`.
fn parse_tags(string: &str, tags: &mut Labels) {
    for pair in string.split(',') {
        let (name, value) = pair.split_once(':').unwrap_or((pair, ""));
        if name.is_empty() {
            continue;
        }
        tags.insert(sanitize_label_name(name), value.to_owned());
    }
}

/// Iterator over decoded events returned from [`Event::parse_all`].
#[derive(Clone, Debug, Default)]
pub struct ParseEvents<'a> {
    slice: &'a [u8],
}

impl Iterator for ParseEvents<'_> {
    type Item = Result<Event, ParseLineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();

            let current = current.strip_suffix(b"\r").unwrap_or(current);
            if current.is_empty() {
                continue;
            }

            return Some(Event::parse(current));
        }
    }
}
