//! P2 Performance Tests: Latency Thresholds
//!
//! Coarse wall-clock bounds on single operations. Every bound is a strict
//! `<` on elapsed milliseconds.

#![cfg(feature = "performance")]

use stack_tests::logging;
use stack_tests::probe;
use stack_tests::topology::StackConnection;
use std::time::Instant;

const CADDY_SEQUENTIAL_REQUESTS: usize = 10;
const CADDY_MEAN_BOUND_MS: u64 = 500;
const CADDY_CONCURRENT_REQUESTS: usize = 20;
const LOKI_READY_BOUND_MS: u64 = 1000;
const EXPORTER_BOUND_MS: u64 = 2000;

fn stack() -> StackConnection {
    logging::init_for_tests();
    StackConnection::new().expect("Failed to load topology - check STACK_* overrides")
}

#[tokio::test]
async fn test_caddy_mean_response_time() {
    let stack = stack();
    let url = stack
        .topology()
        .caddy_base_url()
        .expect("Topology should contain Caddy");

    let samples = probe::sequential(stack.http_client(), &url, CADDY_SEQUENTIAL_REQUESTS)
        .await
        .expect("Every sequential request should succeed");

    probe::assert_mean_latency("caddy GET /", &samples, CADDY_MEAN_BOUND_MS)
        .expect("Mean Caddy response time should stay under bound");
}

#[tokio::test]
async fn test_caddy_concurrent_requests() {
    let stack = stack();
    let url = stack
        .topology()
        .caddy_base_url()
        .expect("Topology should contain Caddy");

    let succeeded = probe::fan_out(stack.http_client(), &url, CADDY_CONCURRENT_REQUESTS)
        .await
        .into_result()
        .expect("All concurrent requests should succeed");

    assert_eq!(succeeded, CADDY_CONCURRENT_REQUESTS);
}

#[tokio::test]
async fn test_loki_ready_response_time() {
    let stack = stack();

    let ready = stack
        .loki()
        .expect("Topology should contain Loki")
        .ready()
        .await
        .expect("Loki should be ready");

    probe::assert_latency("loki /ready", ready.elapsed, LOKI_READY_BOUND_MS)
        .expect("Loki /ready should answer under bound");
}

#[tokio::test]
async fn test_node_exporter_response_time() {
    let stack = stack();

    for machine in stack.topology().exporters() {
        let start = Instant::now();
        stack
            .exporter(machine)
            .metrics()
            .await
            .unwrap_or_else(|e| panic!("{} exporter should respond: {}", machine.name, e));

        probe::assert_latency(
            &format!("{} node-exporter /metrics", machine.name),
            start.elapsed(),
            EXPORTER_BOUND_MS,
        )
        .unwrap_or_else(|e| panic!("{}", e));
    }
}

#[cfg(feature = "browser")]
mod page_loads {
    use super::*;
    use serial_test::serial;
    use stack_tests::browser::BrowserSession;

    const PAGE_LOAD_BOUND_MS: u64 = 5000;

    async fn assert_page_load(operation: &str, url: &str) {
        let stack = stack();
        let session = BrowserSession::launch(&stack.topology().screenshot_dir)
            .await
            .expect("Chromium should launch - is it installed?");

        let elapsed = session
            .load(url)
            .await
            .unwrap_or_else(|e| panic!("{} should load: {}", url, e));
        session.close().await;

        probe::assert_latency(operation, elapsed, PAGE_LOAD_BOUND_MS)
            .unwrap_or_else(|e| panic!("{}", e));
    }

    #[tokio::test]
    #[serial]
    async fn test_grafana_page_load() {
        let url = stack().topology().grafana_base_url.clone();
        assert_page_load("grafana UI load", &url).await;
    }

    #[tokio::test]
    #[serial]
    async fn test_prometheus_page_load() {
        let url = stack()
            .topology()
            .prometheus_base_url()
            .expect("Topology should contain Prometheus");
        assert_page_load("prometheus UI load", &url).await;
    }
}
