//! Observability Stack Verification Suite
//!
//! This crate provides black-box checks for the observability stack deployed
//! across the lab VMs: the Caddy ingress, Prometheus, Grafana, Loki and the
//! node exporters. Every test probes a fixed address and asserts on status
//! codes, bodies, UI visibility, or coarse latency bounds.
//!
//! # Features
//!
//! - `smoke`: Readiness of every service
//! - `services`: Per-service HTTP contract checks
//! - `browser`: Headless Chromium UI checks and screenshots
//! - `performance`: Latency thresholds and concurrent proxy load
//! - `integration`: Cross-service checks (targets, datasources, health sweep)
//! - `all`: Enable all test categories
//!
//! # Prerequisites
//!
//! 1. The lab VMs reachable from the test host (see `topology` for addresses,
//!    `STACK_VM_{A,B,C}_ADDR` to override)
//! 2. Chromium installed for the `browser` feature
//!
//! # Usage
//!
//! ```bash
//! # Unit tests only (no default features)
//! cargo test -p stack-tests
//!
//! # Smoke tests
//! cargo test -p stack-tests --features smoke
//!
//! # Full suite, screenshots in ./screenshots
//! cargo test -p stack-tests --features all
//!
//! # One-shot health sweep with timings
//! cargo run -p stack-tests --bin stack-sweep
//! ```

#[cfg(feature = "browser")]
pub mod browser;
pub mod eventual;
pub mod exposition;
pub mod fixtures;
pub mod logging;
pub mod probe;
pub mod sweep;
pub mod topology;
