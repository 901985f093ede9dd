//! Prometheus client fixture for the query and target APIs.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::probe::{self, ProbeError, ProbeResult};

/// Prometheus query response.
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    pub status: String,
    pub data: QueryData,
}

/// Query response data.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    pub result_type: String,
    pub result: Vec<QueryResult>,
}

/// A single query result.
#[derive(Debug, Deserialize)]
pub struct QueryResult {
    pub metric: HashMap<String, String>,
    pub value: Option<(f64, String)>,
    pub values: Option<Vec<(f64, String)>>,
}

/// Request parameters for a Prometheus query.
#[derive(Debug, Serialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

impl QueryRequest {
    /// Create a new instant query.
    pub fn instant(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            time: None,
        }
    }
}

/// Response of `/api/v1/targets`.
#[derive(Debug, Deserialize)]
pub struct TargetsResponse {
    pub status: String,
    pub data: TargetsData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetsData {
    #[serde(default)]
    pub active_targets: Vec<Target>,
}

/// One scrape target.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub discovered_labels: HashMap<String, String>,
    pub scrape_url: Option<String>,
    pub health: Option<String>,
}

impl Target {
    /// Whether this target scrapes a node exporter.
    ///
    /// Matches the `node` job label, or a discovered `/metrics` path for
    /// targets relabelled under another job.
    pub fn is_node_exporter(&self) -> bool {
        self.labels.get("job").map(String::as_str) == Some("node")
            || self.discovered_labels.get("__metrics_path__").map(String::as_str) == Some("/metrics")
    }
}

impl TargetsData {
    pub fn node_targets(&self) -> impl Iterator<Item = &Target> {
        self.active_targets.iter().filter(|t| t.is_node_exporter())
    }
}

/// Client for querying Prometheus.
pub struct PrometheusClient {
    base_url: String,
    http_client: Client,
}

impl PrometheusClient {
    /// Create a new Prometheus client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a client that shares an existing HTTP client.
    pub fn with_client(base_url: impl Into<String>, http_client: Client) -> Self {
        Self {
            base_url: base_url.into(),
            http_client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /-/ready`; must succeed.
    pub async fn ready(&self) -> Result<ProbeResult, ProbeError> {
        let url = format!("{}/-/ready", self.base_url);
        probe::get(&self.http_client, &url).await?.expect_success()
    }

    /// Execute an instant query.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse, ProbeError> {
        let query_url = format!("{}/api/v1/query", self.base_url);

        let result = probe::send(self.http_client.get(&query_url).query(&request), &query_url)
            .await?
            .expect_success()?;

        let query_response = result.json::<QueryResponse>()?;

        if query_response.status != "success" {
            return Err(ProbeError::ContentMismatch {
                url: query_url,
                message: format!("query status: {}", query_response.status),
            });
        }

        info!(
            query = %request.query,
            results = query_response.data.result.len(),
            "Prometheus query succeeded"
        );
        Ok(query_response)
    }

    /// Execute a PromQL query and return the results.
    pub async fn query_promql(&self, promql: &str) -> Result<QueryResponse, ProbeError> {
        self.query(QueryRequest::instant(promql)).await
    }

    /// List scrape targets.
    pub async fn targets(&self) -> Result<TargetsResponse, ProbeError> {
        let url = format!("{}/api/v1/targets", self.base_url);

        let targets = probe::get(&self.http_client, &url)
            .await?
            .expect_success()?
            .json::<TargetsResponse>()?;

        if targets.status != "success" {
            return Err(ProbeError::ContentMismatch {
                url,
                message: format!("targets status: {}", targets.status),
            });
        }

        info!(
            active = targets.data.active_targets.len(),
            node = targets.data.node_targets().count(),
            "Prometheus targets listed"
        );
        Ok(targets)
    }

    /// Get the HTTP client for custom requests.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }
}
