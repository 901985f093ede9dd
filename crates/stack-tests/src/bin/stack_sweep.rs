//! One-shot health sweep of the deployed stack.
//!
//! Probes every process in the machine table plus the Grafana health API and
//! prints one line per probe with its latency. The sweep stops at the first
//! failure; probes that passed before it are still reported. Exits non-zero
//! on any failure.

use std::process::ExitCode;

use stack_tests::logging;
use stack_tests::sweep;
use stack_tests::topology::StackConnection;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let connection = match StackConnection::new() {
        Ok(connection) => connection,
        Err(e) => {
            println!("FAIL {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(topology = ?connection.topology(), "Starting health sweep");

    let outcome = sweep::run_sweep(connection.http_client(), &connection.topology().machines).await;
    for line in sweep::report(&outcome) {
        println!("{}", line);
    }
    let checks = match outcome {
        Ok(checks) => checks,
        Err(_) => return ExitCode::FAILURE,
    };

    match connection.grafana().health().await {
        Ok(health) if health.database == "ok" => {
            println!("PASS {:<6} {:<14} database ok", "vm-a", "grafana");
        }
        Ok(health) => {
            println!("FAIL {:<6} {:<14} database is '{}'", "vm-a", "grafana", health.database);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            println!("FAIL {:<6} {:<14} {}", "vm-a", "grafana", e);
            return ExitCode::FAILURE;
        }
    }

    info!(probes = checks.len() + 1, "Health sweep passed");
    ExitCode::SUCCESS
}
