//! Grafana client fixture for the health and datasource APIs.

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use crate::probe::{self, ProbeError};

/// Response of `/api/health`.
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub database: String,
    pub version: Option<String>,
    pub commit: Option<String>,
}

/// One configured datasource from `/api/datasources`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    pub id: Option<u64>,
    pub uid: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// First datasource of the given type (`prometheus`, `loki`, ...).
pub fn find_datasource<'a>(datasources: &'a [Datasource], kind: &str) -> Option<&'a Datasource> {
    datasources.iter().find(|ds| ds.kind == kind)
}

/// Client for the Grafana HTTP API.
///
/// The password is held as a [`SecretString`] and only exposed when the
/// basic-auth header is built.
pub struct GrafanaClient {
    base_url: String,
    user: String,
    password: SecretString,
    http_client: Client,
}

impl GrafanaClient {
    pub fn new(base_url: impl Into<String>, user: impl Into<String>, password: SecretString) -> Self {
        Self::with_client(base_url, user, password, Client::new())
    }

    pub fn with_client(
        base_url: impl Into<String>,
        user: impl Into<String>,
        password: SecretString,
        http_client: Client,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            user: user.into(),
            password,
            http_client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /api/health` (unauthenticated).
    pub async fn health(&self) -> Result<HealthResponse, ProbeError> {
        let url = format!("{}/api/health", self.base_url);
        probe::get(&self.http_client, &url)
            .await?
            .expect_success()?
            .json::<HealthResponse>()
    }

    /// `GET /api/datasources` with basic auth.
    pub async fn datasources(&self) -> Result<Vec<Datasource>, ProbeError> {
        let url = format!("{}/api/datasources", self.base_url);
        let request = self
            .http_client
            .get(&url)
            .basic_auth(&self.user, Some(self.password.expose_secret()));

        let datasources = probe::send(request, &url)
            .await?
            .expect_success()?
            .json::<Vec<Datasource>>()?;

        info!(
            count = datasources.len(),
            kinds = ?datasources.iter().map(|ds| ds.kind.as_str()).collect::<Vec<_>>(),
            "Grafana datasources listed"
        );
        Ok(datasources)
    }
}
