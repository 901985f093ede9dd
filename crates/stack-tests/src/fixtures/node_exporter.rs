//! Node exporter fixture.

use reqwest::Client;

use crate::exposition;
use crate::probe::{self, ProbeError, ProbeResult};

/// Client for one node exporter.
pub struct ExporterClient {
    base_url: String,
    http_client: Client,
}

impl ExporterClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http_client: Client) -> Self {
        Self {
            base_url: base_url.into(),
            http_client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /metrics`; must succeed.
    pub async fn metrics(&self) -> Result<ProbeResult, ProbeError> {
        let url = format!("{}/metrics", self.base_url);
        probe::get(&self.http_client, &url).await?.expect_success()
    }

    /// Fetch `/metrics` and require every standard node metric to be present.
    pub async fn expect_node_metrics(&self) -> Result<ProbeResult, ProbeError> {
        let result = self.metrics().await?;
        let missing = exposition::missing_metrics(&result.body, exposition::NODE_EXPORTER_METRICS);

        if missing.is_empty() {
            Ok(result)
        } else {
            Err(ProbeError::ContentMismatch {
                url: result.url,
                message: format!("missing metrics: {}", missing.join(", ")),
            })
        }
    }

    /// Fetch `/metrics` and validate the first sample lines against the
    /// exposition grammar.
    pub async fn expect_well_formed(&self) -> Result<ProbeResult, ProbeError> {
        let result = self.metrics().await?;
        let offending = exposition::validate_sample(&result.body, exposition::DEFAULT_SAMPLE_LINES);

        if offending.is_empty() {
            Ok(result)
        } else {
            let message = format!("malformed sample lines: {:?}", offending);
            Err(ProbeError::ContentMismatch {
                url: result.url,
                message,
            })
        }
    }
}
