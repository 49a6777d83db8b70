use std::collections::BTreeMap;

pub mod aggregator;
mod flusher;
mod listener;
pub mod mapper;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod stats;
mod watcher;

/// Label names to label values, kept sorted so equal label sets compare and hash equally.
pub type Labels = BTreeMap<String, String>;

/// Replaces every character that is not valid in a Prometheus metric name with `_`.
///
/// A leading digit gets a `_` prefix, so the result is always a valid name.
///
/// ```
/// use statsd_bridge::sanitize_metric_name;
///
/// assert_eq!(sanitize_metric_name("foo.bar"), "foo_bar");
/// assert_eq!(sanitize_metric_name("weird$name"), "weird_name");
/// ```
#[must_use]
pub fn sanitize_metric_name(name: &str) -> String {
    sanitize(name, |c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Like [`sanitize_metric_name`] but for label names, which may not contain `:`.
#[must_use]
pub fn sanitize_label_name(name: &str) -> String {
    sanitize(name, |c| c.is_ascii_alphanumeric() || c == '_')
}

fn sanitize(name: &str, valid: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        out.push('_');
    }
    out.extend(name.chars().map(|c| if valid(c) { c } else { '_' }));
    out
}

pub(crate) fn is_valid_label_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
