//! Checks for the line-oriented metrics text exposed by exporters.
//!
//! Validation only samples a prefix of the sample lines. It is a smoke check
//! that the payload is the expected shape, not a full parser.

use regex::Regex;
use std::sync::LazyLock;

/// Number of sample lines checked by [`validate_sample`] in the suite.
pub const DEFAULT_SAMPLE_LINES: usize = 10;

/// `name[{labels}] value`
static SAMPLE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*(\{.*\})?\s+[0-9.e+-]+$").unwrap()
});

/// Metrics every node exporter must expose.
pub const NODE_EXPORTER_METRICS: &[&str] = &[
    "node_cpu_seconds_total",
    "node_memory_MemTotal_bytes",
    "node_filesystem_size_bytes",
    "node_network_receive_bytes_total",
    "node_load1",
];

/// Lines that carry samples: not blank and not a `#` comment.
///
/// Lines are split on `\n` only; a stray `\r` stays on the line and fails
/// the grammar.
pub fn sample_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n')
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
}

/// Whether one sample line matches the grammar.
pub fn is_valid_sample_line(line: &str) -> bool {
    SAMPLE_LINE.is_match(line)
}

/// Check the first `limit` sample lines and return the ones that do not
/// match the grammar. An empty result means the sample is well formed.
pub fn validate_sample(text: &str, limit: usize) -> Vec<&str> {
    sample_lines(text)
        .take(limit)
        .filter(|line| !is_valid_sample_line(line))
        .collect()
}

/// Names from `expected` that do not appear anywhere in `text`.
pub fn missing_metrics<'a>(text: &str, expected: &[&'a str]) -> Vec<&'a str> {
    expected
        .iter()
        .copied()
        .filter(|name| !text.contains(name))
        .collect()
}
