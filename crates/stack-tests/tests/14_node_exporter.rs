//! P1 Service Tests: Node Exporters
//!
//! Every machine in the table runs a node exporter; each must expose the
//! standard host metrics in well-formed exposition text.

#![cfg(feature = "services")]

use stack_tests::logging;
use stack_tests::topology::StackConnection;

fn stack() -> StackConnection {
    logging::init_for_tests();
    StackConnection::new().expect("Failed to load topology - check STACK_* overrides")
}

#[tokio::test]
async fn test_exporters_serve_node_metrics() {
    let stack = stack();

    for machine in stack.topology().exporters() {
        stack
            .exporter(machine)
            .expect_node_metrics()
            .await
            .unwrap_or_else(|e| panic!("{} should expose node metrics: {}", machine.name, e));
    }
}

#[tokio::test]
async fn test_exporters_metric_format() {
    let stack = stack();

    for machine in stack.topology().exporters() {
        stack
            .exporter(machine)
            .expect_well_formed()
            .await
            .unwrap_or_else(|e| panic!("{} should serve well-formed metrics: {}", machine.name, e));
    }
}
