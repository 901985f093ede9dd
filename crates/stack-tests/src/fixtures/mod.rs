//! Test fixtures for interacting with stack services.

pub mod caddy;
pub mod grafana;
pub mod loki;
pub mod node_exporter;
pub mod prometheus;

pub use caddy::CaddyClient;
pub use grafana::GrafanaClient;
pub use loki::LokiClient;
pub use node_exporter::ExporterClient;
pub use prometheus::PrometheusClient;
