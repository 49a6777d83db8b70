//! Translation of StatsD bucket names into metric names and labels.
//!
//! Mapping configuration is line oriented. Rules are separated by blank lines and lines starting
//! with `#` are comments:
//!
//! ```text
//! # specific rules first
//! api.*.requests
//! name="api_requests"
//! method="$1"
//!
//! test.dispatcher.*.*.*
//! name="dispatcher_events_total"
//! processor="$1"
//! action="$2"
//! outcome="$3"
//! ```
//!
//! The first line of a rule is its pattern: dot-separated literal segments or `*` wildcards.
//! `name` gives the metric name template; every other key is a label. `$n` refers to the
//! n-th wildcard capture. Rules are tried in file order and the first match wins.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::bridge::{is_valid_label_name, sanitize_metric_name, Labels};
use crate::{BridgeError, BridgeResult, MappingError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    /// 0-based capture index.
    Capture(usize),
}

/// A string with `$n` capture references, split at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Template {
    parts: Vec<TemplatePart>,
}

impl Template {
    fn compile(raw: &str, captures: usize, line: usize) -> Result<Self, MappingError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                literal.push(c);
                continue;
            }
            let mut digits = String::new();
            while let Some(d) = chars.next_if(char::is_ascii_digit) {
                digits.push(d);
            }
            if digits.is_empty() {
                literal.push('$');
                continue;
            }
            let index: usize = digits.parse().map_err(|_| {
                MappingError::new(line, format!("capture reference ${digits} is too large"))
            })?;
            if index == 0 || index > captures {
                return Err(MappingError::new(
                    line,
                    format!(
                        "template references ${index} but the pattern has {captures} wildcard(s)"
                    ),
                ));
            }
            if !literal.is_empty() {
                parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
            }
            parts.push(TemplatePart::Capture(index - 1));
        }
        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(literal));
        }

        Ok(Self { parts })
    }

    fn render(&self, captures: &[&str]) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(s) => out.push_str(s),
                TemplatePart::Capture(i) => {
                    out.push_str(captures.get(*i).copied().unwrap_or_default());
                }
            }
        }
        out
    }
}

/// One compiled rule: a fixed-length segment pattern plus name and label templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    pattern: String,
    segments: Vec<Segment>,
    name: Template,
    labels: Vec<(String, Template)>,
}

impl MappingRule {
    /// The pattern as written in the configuration.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn matches<'a>(&self, path: &[&'a str], captures: &mut Vec<&'a str>) -> bool {
        captures.clear();
        for (segment, part) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return false,
                Segment::Wildcard => captures.push(part),
            }
        }
        true
    }
}

/// A resolved metric identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricId {
    /// Prometheus metric name.
    pub name: String,
    /// Labels produced by the matching rule.
    pub labels: Labels,
    /// Whether a rule matched, as opposed to the sanitized bucket fallback.
    pub matched: bool,
}

/// An immutable, ordered rule set.
///
/// Replaced wholesale on reload, never mutated in place.
#[derive(Debug, Default, Clone)]
pub struct MetricMapper {
    rules: Vec<MappingRule>,
    /// Rule indices by segment count, each list in file order.
    by_len: HashMap<usize, Vec<usize>>,
}

impl MetricMapper {
    /// Compiles a mapping configuration.
    ///
    /// # Errors
    /// Returns [`MappingError`] for the first structurally invalid line.
    pub fn compile(config: &str) -> Result<Self, MappingError> {
        let mut rules = Vec::new();
        let mut pending: Option<PendingRule> = None;

        for (idx, raw_line) in config.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();

            if line.is_empty() {
                if let Some(rule) = pending.take() {
                    rules.push(rule.finish()?);
                }
                continue;
            }
            if line.starts_with('#') {
                continue;
            }

            match pending.as_mut() {
                None => pending = Some(PendingRule::start(line, line_no)?),
                Some(rule) => rule.assign(line, line_no)?,
            }
        }
        if let Some(rule) = pending.take() {
            rules.push(rule.finish()?);
        }

        let mut by_len: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            by_len.entry(rule.segments.len()).or_default().push(i);
        }

        Ok(Self { rules, by_len })
    }

    /// The compiled rules, in file order.
    #[must_use]
    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    /// Finds the first rule matching `bucket` and renders its templates.
    ///
    /// Returns `None` when no rule matches.
    #[must_use]
    pub fn find(&self, bucket: &str) -> Option<MetricId> {
        let path: Vec<&str> = bucket.split('.').collect();
        let candidates = self.by_len.get(&path.len())?;
        let mut captures = Vec::with_capacity(path.len());

        for &i in candidates {
            let rule = &self.rules[i];
            if rule.matches(&path, &mut captures) {
                let labels = rule
                    .labels
                    .iter()
                    .map(|(name, template)| (name.clone(), template.render(&captures)))
                    .collect();
                return Some(MetricId {
                    name: sanitize_metric_name(&rule.name.render(&captures)),
                    labels,
                    matched: true,
                });
            }
        }
        None
    }

    /// Resolves `bucket`, falling back to the sanitized bucket name without labels.
    #[must_use]
    pub fn resolve(&self, bucket: &str) -> MetricId {
        self.find(bucket).unwrap_or_else(|| MetricId {
            name: sanitize_metric_name(bucket),
            labels: Labels::new(),
            matched: false,
        })
    }
}

struct PendingRule {
    pattern: String,
    segments: Vec<Segment>,
    captures: usize,
    name: Option<Template>,
    labels: Vec<(String, Template)>,
    line: usize,
}

impl PendingRule {
    fn start(line: &str, line_no: usize) -> Result<Self, MappingError> {
        let mut segments = Vec::new();
        for part in line.split('.') {
            if part == "*" {
                segments.push(Segment::Wildcard);
            } else if !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
            {
                segments.push(Segment::Literal(part.to_owned()));
            } else {
                return Err(MappingError::new(
                    line_no,
                    format!("invalid pattern segment {part:?} in {line:?}"),
                ));
            }
        }
        let captures = segments
            .iter()
            .filter(|s| matches!(s, Segment::Wildcard))
            .count();

        Ok(Self {
            pattern: line.to_owned(),
            segments,
            captures,
            name: None,
            labels: Vec::new(),
            line: line_no,
        })
    }

    fn assign(&mut self, line: &str, line_no: usize) -> Result<(), MappingError> {
        let (key, value) = line.split_once('=').ok_or_else(|| {
            MappingError::new(line_no, format!("expected key=\"value\", got {line:?}"))
        })?;
        let key = key.trim();
        let value = value
            .trim()
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .ok_or_else(|| MappingError::new(line_no, format!("value of {key:?} must be quoted")))?;

        if !is_valid_label_name(key) {
            return Err(MappingError::new(line_no, format!("invalid label name {key:?}")));
        }
        let template = Template::compile(value, self.captures, line_no)?;

        if key == "name" {
            if self.name.is_some() {
                return Err(MappingError::new(line_no, "duplicate name"));
            }
            if template.parts.iter().any(|part| {
                matches!(part, TemplatePart::Literal(s)
                    if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':'))
            }) {
                return Err(MappingError::new(line_no, format!("invalid metric name {value:?}")));
            }
            self.name = Some(template);
        } else {
            if self.labels.iter().any(|(name, _)| name == key) {
                return Err(MappingError::new(line_no, format!("duplicate label {key:?}")));
            }
            self.labels.push((key.to_owned(), template));
        }
        Ok(())
    }

    fn finish(self) -> Result<MappingRule, MappingError> {
        let name = self.name.ok_or_else(|| {
            MappingError::new(self.line, format!("rule {:?} has no name", self.pattern))
        })?;
        if name.parts.is_empty() {
            return Err(MappingError::new(self.line, "empty metric name"));
        }
        Ok(MappingRule {
            pattern: self.pattern,
            segments: self.segments,
            name,
            labels: self.labels,
        })
    }
}

/// Result of [`MapperHandle::reload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The new rule set is published.
    Success,
    /// The previous rule set stays in effect.
    Failure,
}

impl ReloadOutcome {
    /// Label value used for the reload counter.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Shared, atomically swappable reference to the current [`MetricMapper`].
///
/// Cloning the handle shares the same slot.
#[derive(Debug, Clone)]
pub struct MapperHandle {
    current: Arc<ArcSwap<MetricMapper>>,
}

impl Default for MapperHandle {
    fn default() -> Self {
        Self::new(MetricMapper::default())
    }
}

impl MapperHandle {
    /// Creates a handle publishing `mapper`.
    #[must_use]
    pub fn new(mapper: MetricMapper) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(mapper)),
        }
    }

    /// Reads and compiles the file at `path`.
    ///
    /// # Errors
    /// Returns [`BridgeError`] if the file cannot be read or does not compile.
    pub fn from_file(path: &Path) -> BridgeResult<Self> {
        Ok(Self::new(load_file(path)?))
    }

    /// A consistent snapshot of the current rule set.
    #[must_use]
    pub fn snapshot(&self) -> Arc<MetricMapper> {
        self.current.load_full()
    }

    /// Resolves `bucket` against one snapshot.
    #[must_use]
    pub fn resolve(&self, bucket: &str) -> MetricId {
        self.current.load().resolve(bucket)
    }

    /// Publishes `mapper` for all subsequent resolutions.
    pub fn publish(&self, mapper: MetricMapper) {
        self.current.store(Arc::new(mapper));
    }

    /// Recompiles from `path` and publishes the result, keeping the old rules on failure.
    pub fn reload(&self, path: &Path) -> ReloadOutcome {
        match load_file(path) {
            Ok(mapper) => {
                info!(
                    "Mapping config {} reloaded, {} rule(s)",
                    path.display(),
                    mapper.rules().len()
                );
                self.publish(mapper);
                ReloadOutcome::Success
            }
            Err(err) => {
                warn!("Error reloading mapping config: {err}");
                ReloadOutcome::Failure
            }
        }
    }
}

fn load_file(path: &Path) -> BridgeResult<MetricMapper> {
    let text = std::fs::read_to_string(path).map_err(|source| BridgeError::MappingRead {
        path: path.to_owned(),
        source,
    })?;
    Ok(MetricMapper::compile(&text)?)
}
