//! Single HTTP probes, latency guards and concurrent fan-out.
//!
//! A probe is one request plus the snapshot of its response. Every check in
//! the suite reduces to building a probe and asserting on it; failures fall
//! into four classes (connectivity, content mismatch, timeout, latency) and
//! are all surfaced through [`ProbeError`].

use futures::future::join_all;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Maximum length of a response body quoted in an error message.
const MAX_BODY_SNIPPET_LEN: usize = 256;

/// Probe errors.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP request to {url} failed: {source}")]
    Connectivity {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}, expected {expected}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        expected: String,
    },

    #[error("Content mismatch at {url}: {message}")]
    ContentMismatch { url: String, message: String },

    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("{operation} took {elapsed_ms}ms, limit is {bound_ms}ms")]
    LatencyExceeded {
        operation: String,
        elapsed_ms: f64,
        bound_ms: u64,
    },

    #[error("{operation}: no latency samples")]
    NoSamples { operation: String },

    #[error("JSON deserialization failed for {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ProbeError {
    pub(crate) fn mismatch(url: impl Into<String>, message: impl Into<String>) -> Self {
        ProbeError::ContentMismatch {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Snapshot of one HTTP response.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
    pub elapsed: Duration,
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Elapsed wall-clock time in whole milliseconds.
    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.as_millis()
    }

    /// Value of a response header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Require a 2xx status.
    pub fn expect_success(self) -> Result<Self, ProbeError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ProbeError::UnexpectedStatus {
                url: self.url,
                status: self.status.as_u16(),
                expected: "2xx".to_string(),
            })
        }
    }

    /// Require exactly `expected`.
    pub fn expect_status(self, expected: StatusCode) -> Result<Self, ProbeError> {
        if self.status == expected {
            Ok(self)
        } else {
            Err(ProbeError::UnexpectedStatus {
                url: self.url,
                status: self.status.as_u16(),
                expected: expected.as_u16().to_string(),
            })
        }
    }

    /// Require the body to contain `needle`.
    pub fn expect_body_contains(self, needle: &str) -> Result<Self, ProbeError> {
        if self.body.contains(needle) {
            Ok(self)
        } else {
            let message = format!(
                "body does not contain '{}': {}",
                needle,
                body_snippet(&self.body)
            );
            Err(ProbeError::mismatch(self.url, message))
        }
    }

    /// Require header `name` to be present and contain `needle`.
    pub fn expect_header_contains(self, name: &str, needle: &str) -> Result<Self, ProbeError> {
        match self.header(name) {
            Some(value) if value.contains(needle) => Ok(self),
            Some(value) => {
                let message = format!("header '{}' is '{}', expected '{}'", name, value, needle);
                Err(ProbeError::mismatch(self.url, message))
            }
            None => {
                let message = format!("header '{}' missing", name);
                Err(ProbeError::mismatch(self.url, message))
            }
        }
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProbeError> {
        serde_json::from_str(&self.body).map_err(|source| ProbeError::Json {
            url: self.url.clone(),
            source,
        })
    }
}

/// Truncate a response body for inclusion in an error message.
pub fn body_snippet(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_SNIPPET_LEN) {
        Some((cut, _)) => format!("{}...[truncated]", &body[..cut]),
        None => body.to_string(),
    }
}

/// Send a request and snapshot the response.
///
/// Elapsed time covers sending the request and reading the full body.
pub async fn send(request: RequestBuilder, url: &str) -> Result<ProbeResult, ProbeError> {
    debug!(url, "Probing");
    let connectivity = |source| ProbeError::Connectivity {
        url: url.to_string(),
        source,
    };

    let start = Instant::now();
    let response = request.send().await.map_err(connectivity)?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.map_err(connectivity)?;
    let elapsed = start.elapsed();

    debug!(url, status = status.as_u16(), elapsed_ms = elapsed.as_millis() as u64, "Probe complete");

    Ok(ProbeResult {
        url: url.to_string(),
        status,
        headers,
        body,
        elapsed,
    })
}

/// GET `url` and snapshot the response.
pub async fn get(client: &Client, url: &str) -> Result<ProbeResult, ProbeError> {
    send(client.get(url), url).await
}

/// Fail unless `elapsed` is strictly under `bound_ms` milliseconds.
pub fn assert_latency(operation: &str, elapsed: Duration, bound_ms: u64) -> Result<(), ProbeError> {
    let elapsed_ms = elapsed.as_millis();
    info!(operation, elapsed_ms = elapsed_ms as u64, bound_ms, "Latency");

    if elapsed_ms < u128::from(bound_ms) {
        Ok(())
    } else {
        Err(ProbeError::LatencyExceeded {
            operation: operation.to_string(),
            elapsed_ms: elapsed_ms as f64,
            bound_ms,
        })
    }
}

/// Mean of whole-millisecond durations. `None` for an empty slice.
pub fn mean_ms(samples: &[Duration]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let total: u128 = samples.iter().map(Duration::as_millis).sum();
    Some(total as f64 / samples.len() as f64)
}

/// Fail unless the mean of `samples` is strictly under `bound_ms`.
pub fn assert_mean_latency(
    operation: &str,
    samples: &[Duration],
    bound_ms: u64,
) -> Result<(), ProbeError> {
    let mean = mean_ms(samples).ok_or_else(|| ProbeError::NoSamples {
        operation: operation.to_string(),
    })?;
    info!(operation, samples = samples.len(), mean_ms = mean, bound_ms, "Mean latency");

    if mean < bound_ms as f64 {
        Ok(())
    } else {
        Err(ProbeError::LatencyExceeded {
            operation: operation.to_string(),
            elapsed_ms: mean,
            bound_ms,
        })
    }
}

/// GET `url` `count` times in sequence; every response must succeed.
///
/// Returns the elapsed time of each request, in order.
pub async fn sequential(
    client: &Client,
    url: &str,
    count: usize,
) -> Result<Vec<Duration>, ProbeError> {
    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        let result = get(client, url).await?.expect_success()?;
        samples.push(result.elapsed);
    }
    Ok(samples)
}

/// Outcome of a concurrent fan-out.
#[derive(Debug, Default)]
pub struct FanOutReport {
    pub url: String,
    pub succeeded: usize,
    pub failures: Vec<String>,
}

impl FanOutReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failures.len()
    }

    /// All-or-nothing: any single failed request fails the fan-out.
    pub fn into_result(self) -> Result<usize, ProbeError> {
        if self.failures.is_empty() {
            Ok(self.succeeded)
        } else {
            Err(ProbeError::mismatch(
                self.url.clone(),
                format!(
                    "{} of {} concurrent requests failed: {}",
                    self.failures.len(),
                    self.total(),
                    self.failures.join("; ")
                ),
            ))
        }
    }
}

/// Fire `count` GETs at `url` at once and wait for all of them.
pub async fn fan_out(client: &Client, url: &str, count: usize) -> FanOutReport {
    let requests = (0..count).map(|_| async move {
        match get(client, url).await {
            Ok(result) if result.is_success() => Ok(()),
            Ok(result) => Err(format!("{} -> {}", url, result.status)),
            Err(e) => Err(e.to_string()),
        }
    });

    let mut report = FanOutReport {
        url: url.to_string(),
        ..Default::default()
    };
    for outcome in join_all(requests).await {
        match outcome {
            Ok(()) => report.succeeded += 1,
            Err(failure) => report.failures.push(failure),
        }
    }

    info!(
        url,
        succeeded = report.succeeded,
        failed = report.failures.len(),
        "Fan-out complete"
    );
    report
}
