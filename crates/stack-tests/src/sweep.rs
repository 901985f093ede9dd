//! Health sweep across every machine of the topology.
//!
//! Which processes are probed on which machine comes straight from the
//! static machine table; nothing is discovered at runtime.

use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::probe::{self, ProbeError};
use crate::topology::{Machine, Process};

/// Order in which a machine's processes are probed.
static SWEEP_ORDER: [Process; 4] = [
    Process::NodeExporter,
    Process::Prometheus,
    Process::Loki,
    Process::Caddy,
];

/// One planned probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepTarget {
    pub machine: String,
    pub process: Process,
    pub url: String,
}

/// A probe that passed.
#[derive(Debug, Clone)]
pub struct SweepCheck {
    pub target: SweepTarget,
    pub status: u16,
    pub elapsed: Duration,
}

impl SweepCheck {
    /// `PASS <machine> <process> <ms>ms <url>`
    pub fn report_line(&self) -> String {
        format!(
            "PASS {:<6} {:<14} {:>5}ms  {}",
            self.target.machine,
            self.target.process,
            self.elapsed.as_millis(),
            self.target.url
        )
    }
}

/// The probe that stopped the sweep, plus the probes that passed before it.
#[derive(Debug, Error)]
#[error("{process} on {machine} is unhealthy: {source}")]
pub struct SweepError {
    pub machine: String,
    pub process: Process,
    #[source]
    pub source: ProbeError,
    pub passed: Vec<SweepCheck>,
}

impl SweepError {
    /// `FAIL <machine> <process> <reason>`
    pub fn report_line(&self) -> String {
        format!("FAIL {:<6} {:<14} {}", self.machine, self.process, self.source)
    }
}

/// One line per probe that ran, in order, ending with the failure if any.
pub fn report(outcome: &Result<Vec<SweepCheck>, SweepError>) -> Vec<String> {
    match outcome {
        Ok(checks) => checks.iter().map(SweepCheck::report_line).collect(),
        Err(failure) => failure
            .passed
            .iter()
            .map(SweepCheck::report_line)
            .chain(std::iter::once(failure.report_line()))
            .collect(),
    }
}

/// Expand the machine table into the probes to run, in order.
pub fn plan(machines: &[Machine]) -> Vec<SweepTarget> {
    machines
        .iter()
        .flat_map(|machine| {
            SWEEP_ORDER
                .iter()
                .filter(move |process| machine.runs(**process))
                .filter_map(move |process| {
                    machine.health_url(*process).map(|url| SweepTarget {
                        machine: machine.name.clone(),
                        process: *process,
                        url,
                    })
                })
        })
        .collect()
}

/// Run the planned probes in order. The first failure stops the sweep.
pub async fn execute(client: &Client, targets: &[SweepTarget]) -> Result<Vec<SweepCheck>, SweepError> {
    let mut checks = Vec::with_capacity(targets.len());

    for target in targets {
        let result = match probe::get(client, &target.url)
            .await
            .and_then(|r| r.expect_success())
        {
            Ok(result) => result,
            Err(source) => {
                return Err(SweepError {
                    machine: target.machine.clone(),
                    process: target.process,
                    source,
                    passed: checks,
                })
            }
        };

        info!(
            machine = %target.machine,
            process = %target.process,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Healthy"
        );

        checks.push(SweepCheck {
            target: target.clone(),
            status: result.status.as_u16(),
            elapsed: result.elapsed,
        });
    }

    Ok(checks)
}

/// Plan and run the sweep over `machines`.
pub async fn run_sweep(client: &Client, machines: &[Machine]) -> Result<Vec<SweepCheck>, SweepError> {
    execute(client, &plan(machines)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Topology;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_plan_follows_machine_table() {
        let topology = Topology::from_vars(&HashMap::new()).unwrap();
        let targets = plan(&topology.machines);

        let summary: Vec<(&str, Process)> = targets
            .iter()
            .map(|t| (t.machine.as_str(), t.process))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("vm-a", Process::NodeExporter),
                ("vm-a", Process::Prometheus),
                ("vm-a", Process::Loki),
                ("vm-b", Process::NodeExporter),
                ("vm-b", Process::Caddy),
                ("vm-c", Process::NodeExporter),
            ]
        );
        assert_eq!(targets[1].url, "http://10.14.185.35:9090/-/ready");
        assert_eq!(targets[4].url, "http://10.14.185.67");
    }

    #[test]
    fn test_promtail_is_never_probed() {
        let machine = Machine::new(
            "logs-only",
            "10.0.0.9".parse().unwrap(),
            &[Process::Promtail],
        );
        assert!(plan(&[machine]).is_empty());
    }

    fn target(server: &MockServer, machine: &str, process: Process, p: &str) -> SweepTarget {
        SweepTarget {
            machine: machine.to_string(),
            process,
            url: format!("{}{}", server.uri(), p),
        }
    }

    #[tokio::test]
    async fn test_execute_all_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let targets = vec![
            target(&server, "vm-a", Process::NodeExporter, "/metrics"),
            target(&server, "vm-a", Process::Loki, "/ready"),
        ];
        let checks = execute(&Client::new(), &targets).await.unwrap();

        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(|c| c.status == 200));
    }

    #[tokio::test]
    async fn test_execute_stops_at_first_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/-/ready"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ready"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let targets = vec![
            target(&server, "vm-a", Process::NodeExporter, "/metrics"),
            target(&server, "vm-a", Process::Prometheus, "/-/ready"),
            target(&server, "vm-a", Process::Loki, "/ready"),
        ];
        let err = execute(&Client::new(), &targets).await.unwrap_err();

        assert_eq!(err.machine, "vm-a");
        assert_eq!(err.process, Process::Prometheus);
        assert!(matches!(
            err.source,
            ProbeError::UnexpectedStatus { status: 503, .. }
        ));
        assert_eq!(err.passed.len(), 1);
        assert_eq!(err.passed[0].target.process, Process::NodeExporter);
    }

    #[tokio::test]
    async fn test_report_keeps_passes_before_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/-/ready"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let targets = vec![
            target(&server, "vm-a", Process::NodeExporter, "/metrics"),
            target(&server, "vm-a", Process::Prometheus, "/-/ready"),
        ];
        let outcome = execute(&Client::new(), &targets).await;
        let lines = report(&outcome);

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("PASS vm-a   node-exporter "));
        assert!(lines[0].contains("ms  "));
        assert!(lines[0].ends_with("/metrics"));
        assert!(lines[1].starts_with("FAIL vm-a   prometheus     "));
        assert!(lines[1].contains("503"));
    }

    #[tokio::test]
    async fn test_report_all_passed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let targets = vec![target(&server, "vm-c", Process::NodeExporter, "/metrics")];
        let lines = report(&execute(&Client::new(), &targets).await);

        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("PASS vm-c"));
    }
}
