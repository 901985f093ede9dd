//! Static deployment topology and connection to the stack under test.
//!
//! The machine table and service addresses are fixed for a given environment.
//! Defaults reproduce the lab deployment; each address can be overridden from
//! the environment so the same suite runs against a rebuilt set of VMs.

use secrecy::SecretString;
use std::collections::{BTreeSet, HashMap};
use std::env;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::fixtures::{CaddyClient, ExporterClient, GrafanaClient, LokiClient, PrometheusClient};

/// Default address of the monitoring VM (Prometheus, Loki, Grafana).
pub const DEFAULT_VM_A_ADDR: &str = "10.14.185.35";

/// Default address of the ingress VM (Caddy).
pub const DEFAULT_VM_B_ADDR: &str = "10.14.185.67";

/// Default address of the worker VM.
pub const DEFAULT_VM_C_ADDR: &str = "10.14.185.213";

/// Grafana listens next to Prometheus on the monitoring VM.
pub const GRAFANA_PORT: u16 = 3000;

/// Default Grafana admin credentials for a fresh install.
pub const DEFAULT_GRAFANA_USER: &str = "admin";
pub const DEFAULT_GRAFANA_PASSWORD: &str = "admin";

/// Default directory for browser screenshots.
pub const DEFAULT_SCREENSHOT_DIR: &str = "screenshots";

/// Default per-request HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Processes a machine is expected to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Process {
    Caddy,
    Prometheus,
    Loki,
    NodeExporter,
    Promtail,
}

impl Process {
    /// Name used in the machine table and in log output.
    pub fn name(&self) -> &'static str {
        match self {
            Process::Caddy => "caddy",
            Process::Prometheus => "prometheus",
            Process::Loki => "loki",
            Process::NodeExporter => "node-exporter",
            Process::Promtail => "promtail",
        }
    }

    /// Port and path of the probe that proves the process is live.
    ///
    /// Promtail only ships logs and exposes nothing the sweep checks.
    pub fn health_probe(&self) -> Option<(u16, &'static str)> {
        match self {
            Process::Caddy => Some((80, "/")),
            Process::Prometheus => Some((9090, "/-/ready")),
            Process::Loki => Some((3100, "/ready")),
            Process::NodeExporter => Some((9100, "/metrics")),
            Process::Promtail => None,
        }
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// One VM of the deployment and the processes it is expected to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    pub name: String,
    pub address: IpAddr,
    pub processes: BTreeSet<Process>,
}

impl Machine {
    pub fn new(name: impl Into<String>, address: IpAddr, processes: &[Process]) -> Self {
        Self {
            name: name.into(),
            address,
            processes: processes.iter().copied().collect(),
        }
    }

    pub fn runs(&self, process: Process) -> bool {
        self.processes.contains(&process)
    }

    /// Base URL of a service on this machine. Port 80 is left implicit.
    pub fn base_url(&self, port: u16) -> String {
        if port == 80 {
            format!("http://{}", self.address)
        } else {
            format!("http://{}:{}", self.address, port)
        }
    }

    /// Base URL of the node exporter on this machine.
    pub fn exporter_base_url(&self) -> String {
        self.base_url(9100)
    }

    /// Full URL of the health probe for `process`, if it has one.
    pub fn health_url(&self, process: Process) -> Option<String> {
        process
            .health_probe()
            .map(|(port, path)| match path {
                "/" => self.base_url(port),
                _ => format!("{}{}", self.base_url(port), path),
            })
    }
}

/// Topology configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid address in {var}: {value}")]
    InvalidAddress { var: String, value: String },

    #[error("Invalid HTTP timeout configuration: {0}")]
    InvalidTimeout(String),

    #[error("No machine in the topology runs {0}")]
    MissingProcess(Process),
}

/// The deployment under test.
///
/// Grafana credentials are redacted in Debug output.
#[derive(Clone)]
pub struct Topology {
    pub machines: Vec<Machine>,
    pub grafana_base_url: String,
    pub grafana_user: String,
    pub grafana_password: SecretString,
    pub screenshot_dir: PathBuf,
    pub http_timeout: Duration,
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("machines", &self.machines)
            .field("grafana_base_url", &self.grafana_base_url)
            .field("grafana_user", &self.grafana_user)
            .field("grafana_password", &"[REDACTED]")
            .field("screenshot_dir", &self.screenshot_dir)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl Topology {
    /// Load the topology from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load the topology from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let vm_a = parse_addr(vars, "STACK_VM_A_ADDR", DEFAULT_VM_A_ADDR)?;
        let vm_b = parse_addr(vars, "STACK_VM_B_ADDR", DEFAULT_VM_B_ADDR)?;
        let vm_c = parse_addr(vars, "STACK_VM_C_ADDR", DEFAULT_VM_C_ADDR)?;

        let machines = vec![
            Machine::new(
                "vm-a",
                vm_a,
                &[
                    Process::Prometheus,
                    Process::Loki,
                    Process::NodeExporter,
                    Process::Promtail,
                ],
            ),
            Machine::new(
                "vm-b",
                vm_b,
                &[Process::Caddy, Process::NodeExporter, Process::Promtail],
            ),
            Machine::new("vm-c", vm_c, &[Process::NodeExporter, Process::Promtail]),
        ];

        let http_timeout = match vars.get("STACK_HTTP_TIMEOUT_SECS") {
            Some(value) => {
                let secs = value.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidTimeout(format!(
                        "STACK_HTTP_TIMEOUT_SECS must be a positive integer, got '{}': {}",
                        value, e
                    ))
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidTimeout(
                        "STACK_HTTP_TIMEOUT_SECS must be greater than 0".to_string(),
                    ));
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        let grafana_user = vars
            .get("STACK_GRAFANA_USER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_GRAFANA_USER.to_string());

        let grafana_password = SecretString::from(
            vars.get("STACK_GRAFANA_PASSWORD")
                .cloned()
                .unwrap_or_else(|| DEFAULT_GRAFANA_PASSWORD.to_string()),
        );

        let screenshot_dir = vars
            .get("STACK_SCREENSHOT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCREENSHOT_DIR));

        Ok(Self {
            grafana_base_url: format!("http://{}:{}", vm_a, GRAFANA_PORT),
            machines,
            grafana_user,
            grafana_password,
            screenshot_dir,
            http_timeout,
        })
    }

    /// First machine in the table that runs `process`.
    pub fn machine_running(&self, process: Process) -> Result<&Machine, ConfigError> {
        self.machines
            .iter()
            .find(|m| m.runs(process))
            .ok_or(ConfigError::MissingProcess(process))
    }

    /// Look up a machine by name.
    pub fn machine(&self, name: &str) -> Option<&Machine> {
        self.machines.iter().find(|m| m.name == name)
    }

    /// Machines that run a node exporter.
    pub fn exporters(&self) -> impl Iterator<Item = &Machine> {
        self.machines
            .iter()
            .filter(|m| m.runs(Process::NodeExporter))
    }

    fn service_base_url(&self, process: Process) -> Result<String, ConfigError> {
        let machine = self.machine_running(process)?;
        let (port, _) = process
            .health_probe()
            .ok_or(ConfigError::MissingProcess(process))?;
        Ok(machine.base_url(port))
    }

    pub fn caddy_base_url(&self) -> Result<String, ConfigError> {
        self.service_base_url(Process::Caddy)
    }

    pub fn prometheus_base_url(&self) -> Result<String, ConfigError> {
        self.service_base_url(Process::Prometheus)
    }

    pub fn loki_base_url(&self) -> Result<String, ConfigError> {
        self.service_base_url(Process::Loki)
    }
}

fn parse_addr(
    vars: &HashMap<String, String>,
    var: &str,
    default: &str,
) -> Result<IpAddr, ConfigError> {
    let value = vars.get(var).map(String::as_str).unwrap_or(default);
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        var: var.to_string(),
        value: value.to_string(),
    })
}

/// Connection to the deployed stack.
///
/// Holds the topology and one shared HTTP client; every fixture built from a
/// connection reuses that client.
pub struct StackConnection {
    topology: Topology,
    http_client: reqwest::Client,
}

impl StackConnection {
    /// Build a connection from the environment.
    pub fn new() -> Result<Self, ConnectionError> {
        Self::with_topology(Topology::from_env()?)
    }

    /// Build a connection for an explicit topology.
    pub fn with_topology(topology: Topology) -> Result<Self, ConnectionError> {
        let http_client = reqwest::Client::builder()
            .timeout(topology.http_timeout)
            .build()?;

        Ok(Self {
            topology,
            http_client,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Get the HTTP client for making requests.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub fn caddy(&self) -> Result<CaddyClient, ConfigError> {
        Ok(CaddyClient::with_client(
            self.topology.caddy_base_url()?,
            self.http_client.clone(),
        ))
    }

    pub fn prometheus(&self) -> Result<PrometheusClient, ConfigError> {
        Ok(PrometheusClient::with_client(
            self.topology.prometheus_base_url()?,
            self.http_client.clone(),
        ))
    }

    pub fn loki(&self) -> Result<LokiClient, ConfigError> {
        Ok(LokiClient::with_client(
            self.topology.loki_base_url()?,
            self.http_client.clone(),
        ))
    }

    pub fn grafana(&self) -> GrafanaClient {
        GrafanaClient::with_client(
            self.topology.grafana_base_url.clone(),
            self.topology.grafana_user.clone(),
            self.topology.grafana_password.clone(),
            self.http_client.clone(),
        )
    }

    /// Node exporter client for one machine.
    pub fn exporter(&self, machine: &Machine) -> ExporterClient {
        ExporterClient::with_client(machine.exporter_base_url(), self.http_client.clone())
    }
}

/// Errors building a [`StackConnection`].
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_default_topology() {
        let topology = Topology::from_vars(&HashMap::new()).unwrap();

        assert_eq!(topology.machines.len(), 3);
        assert_eq!(topology.grafana_base_url, "http://10.14.185.35:3000");
        assert_eq!(
            topology.prometheus_base_url().unwrap(),
            "http://10.14.185.35:9090"
        );
        assert_eq!(topology.loki_base_url().unwrap(), "http://10.14.185.35:3100");
        assert_eq!(topology.caddy_base_url().unwrap(), "http://10.14.185.67");
        assert_eq!(topology.grafana_user, "admin");
        assert_eq!(topology.grafana_password.expose_secret(), "admin");
        assert_eq!(topology.screenshot_dir, PathBuf::from("screenshots"));
        assert_eq!(topology.http_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_machine_table_membership() {
        let topology = Topology::from_vars(&HashMap::new()).unwrap();

        let vm_a = topology.machine("vm-a").unwrap();
        assert!(vm_a.runs(Process::Prometheus));
        assert!(vm_a.runs(Process::Loki));
        assert!(!vm_a.runs(Process::Caddy));

        let vm_b = topology.machine("vm-b").unwrap();
        assert!(vm_b.runs(Process::Caddy));
        assert!(!vm_b.runs(Process::Prometheus));

        let vm_c = topology.machine("vm-c").unwrap();
        assert_eq!(
            vm_c.processes,
            [Process::NodeExporter, Process::Promtail].into_iter().collect()
        );

        assert_eq!(topology.exporters().count(), 3);
    }

    #[test]
    fn test_health_urls() {
        let topology = Topology::from_vars(&HashMap::new()).unwrap();
        let vm_a = topology.machine("vm-a").unwrap();
        let vm_b = topology.machine("vm-b").unwrap();

        assert_eq!(
            vm_a.health_url(Process::NodeExporter).as_deref(),
            Some("http://10.14.185.35:9100/metrics")
        );
        assert_eq!(
            vm_a.health_url(Process::Prometheus).as_deref(),
            Some("http://10.14.185.35:9090/-/ready")
        );
        assert_eq!(
            vm_a.health_url(Process::Loki).as_deref(),
            Some("http://10.14.185.35:3100/ready")
        );
        assert_eq!(
            vm_b.health_url(Process::Caddy).as_deref(),
            Some("http://10.14.185.67")
        );
        assert_eq!(vm_b.health_url(Process::Promtail), None);
    }

    #[test]
    fn test_address_overrides() {
        let vars = HashMap::from([
            ("STACK_VM_A_ADDR".to_string(), "127.0.0.1".to_string()),
            ("STACK_VM_B_ADDR".to_string(), "127.0.0.2".to_string()),
            ("STACK_GRAFANA_PASSWORD".to_string(), "s3cret".to_string()),
            ("STACK_SCREENSHOT_DIR".to_string(), "/tmp/shots".to_string()),
            ("STACK_HTTP_TIMEOUT_SECS".to_string(), "3".to_string()),
        ]);
        let topology = Topology::from_vars(&vars).unwrap();

        assert_eq!(topology.grafana_base_url, "http://127.0.0.1:3000");
        assert_eq!(topology.caddy_base_url().unwrap(), "http://127.0.0.2");
        assert_eq!(
            topology.machine("vm-c").unwrap().exporter_base_url(),
            "http://10.14.185.213:9100"
        );
        assert_eq!(topology.grafana_password.expose_secret(), "s3cret");
        assert_eq!(topology.screenshot_dir, PathBuf::from("/tmp/shots"));
        assert_eq!(topology.http_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_address_rejected() {
        let vars = HashMap::from([("STACK_VM_C_ADDR".to_string(), "not-an-ip".to_string())]);
        let err = Topology::from_vars(&vars).unwrap_err();

        assert!(
            matches!(err, ConfigError::InvalidAddress { ref var, .. } if var == "STACK_VM_C_ADDR")
        );
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let zero = HashMap::from([("STACK_HTTP_TIMEOUT_SECS".to_string(), "0".to_string())]);
        assert!(matches!(
            Topology::from_vars(&zero),
            Err(ConfigError::InvalidTimeout(_))
        ));

        let garbage = HashMap::from([("STACK_HTTP_TIMEOUT_SECS".to_string(), "soon".to_string())]);
        assert!(matches!(
            Topology::from_vars(&garbage),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_debug_redacts_grafana_password() {
        let vars = HashMap::from([(
            "STACK_GRAFANA_PASSWORD".to_string(),
            "super-secret-value".to_string(),
        )]);
        let topology = Topology::from_vars(&vars).unwrap();
        let debug = format!("{:?}", topology);

        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-value"));
    }
}
