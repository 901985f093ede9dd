//! Caddy ingress fixture.

use reqwest::Client;

use crate::probe::{self, ProbeError, ProbeResult};

/// Path that no site on the proxy serves.
pub const UNKNOWN_PATH: &str = "/nonexistent-page";

/// Client for the reverse proxy.
pub struct CaddyClient {
    base_url: String,
    http_client: Client,
}

impl CaddyClient {
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

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// `GET /`. The status is not checked.
    pub async fn root(&self) -> Result<ProbeResult, ProbeError> {
        probe::get(&self.http_client, &self.base_url).await
    }

    /// `GET {path}`. The status is not checked.
    pub async fn get(&self, path: &str) -> Result<ProbeResult, ProbeError> {
        let url = format!("{}{}", self.base_url, path);
        probe::get(&self.http_client, &url).await
    }
}
