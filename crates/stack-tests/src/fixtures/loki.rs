//! Loki client fixture for readiness, metrics, and the query APIs.

use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::probe::{self, ProbeError, ProbeResult};

/// Envelope shared by the Loki JSON APIs.
#[derive(Debug, Deserialize)]
pub struct LokiResponse<T> {
    pub status: String,
    pub data: T,
}

/// Parameters for `/loki/api/v1/query_range`. Timestamps are nanoseconds
/// since the Unix epoch.
#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub query: String,
    pub limit: u32,
    pub start_ns: i64,
    pub end_ns: i64,
}

impl RangeQuery {
    /// Query the `window` ending now.
    pub fn last(query: impl Into<String>, limit: u32, window: Duration) -> Self {
        let end_ns = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let window_ns = i64::try_from(window.as_nanos()).unwrap_or(i64::MAX);

        Self {
            query: query.into(),
            limit,
            start_ns: end_ns.saturating_sub(window_ns),
            end_ns,
        }
    }

    fn params(&self) -> [(&'static str, String); 4] {
        [
            ("query", self.query.clone()),
            ("limit", self.limit.to_string()),
            ("start", self.start_ns.to_string()),
            ("end", self.end_ns.to_string()),
        ]
    }
}

/// Client for the Loki HTTP API.
pub struct LokiClient {
    base_url: String,
    http_client: Client,
}

impl LokiClient {
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

    /// `GET /ready`; must succeed with a body containing "ready".
    pub async fn ready(&self) -> Result<ProbeResult, ProbeError> {
        let url = format!("{}/ready", self.base_url);
        probe::get(&self.http_client, &url)
            .await?
            .expect_success()?
            .expect_body_contains("ready")
    }

    /// `GET /metrics`; must succeed.
    pub async fn metrics(&self) -> Result<ProbeResult, ProbeError> {
        let url = format!("{}/metrics", self.base_url);
        probe::get(&self.http_client, &url).await?.expect_success()
    }

    /// Run a range query. The `data` payload is returned untyped.
    pub async fn query_range(
        &self,
        query: &RangeQuery,
    ) -> Result<LokiResponse<serde_json::Value>, ProbeError> {
        let url = format!("{}/loki/api/v1/query_range", self.base_url);
        let request = self.http_client.get(&url).query(&query.params());

        let response = self.fetch_json(request, &url).await?;
        info!(query = %query.query, limit = query.limit, "Loki range query succeeded");
        Ok(response)
    }

    /// List label names.
    pub async fn labels(&self) -> Result<LokiResponse<Vec<String>>, ProbeError> {
        let url = format!("{}/loki/api/v1/labels", self.base_url);
        let response = self
            .fetch_json::<Vec<String>>(self.http_client.get(&url), &url)
            .await?;
        info!(labels = response.data.len(), "Loki labels listed");
        Ok(response)
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<LokiResponse<T>, ProbeError> {
        let response = probe::send(request, url)
            .await?
            .expect_success()?
            .json::<LokiResponse<T>>()?;

        if response.status != "success" {
            return Err(ProbeError::ContentMismatch {
                url: url.to_string(),
                message: format!("Loki status: {}", response.status),
            });
        }
        Ok(response)
    }
}
