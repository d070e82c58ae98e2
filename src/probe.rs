use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::models::{fallback_service_name, PortRecord, PortState, FALLBACK_PORTS};

/// Per-attempt timeout for fallback TCP connect probes.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// A failed probe of one host. Non-fatal: the host simply contributes an
/// empty record list and the phase moves on.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run nmap against {host}: {source}")]
    Spawn {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("nmap exited with {status} for {host}")]
    ToolFailed {
        host: String,
        status: std::process::ExitStatus,
    },
}

/// Port probing strategy. Selected once per run by [`detect_backend`];
/// never re-evaluated per host.
#[async_trait]
pub trait ProbeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Probe one host for open services.
    async fn probe_host(&self, host: &str) -> Result<Vec<PortRecord>, ProbeError>;
}

/// Capability probe: prefer nmap when it is on the execution path,
/// otherwise fall back to raw TCP connect probing for the entire run.
pub async fn detect_backend(concurrency: usize) -> Box<dyn ProbeBackend> {
    match Command::new("nmap").arg("--version").output().await {
        Ok(output) if output.status.success() => {
            info!("nmap detected, using service/version scanning");
            Box::new(NmapBackend)
        }
        _ => {
            warn!("nmap not available, falling back to TCP connect probing");
            Box::new(ConnectBackend::new(concurrency))
        }
    }
}

/// Runs the selected backend over every resolved host.
///
/// Per-host failures are logged and recorded as an empty sequence; they
/// never abort the probing of the remaining hosts and never demote the run
/// to the other backend.
pub async fn probe_hosts(
    backend: &dyn ProbeBackend,
    hosts: &[String],
    verbose: bool,
) -> BTreeMap<String, Vec<PortRecord>> {
    let mut ports = BTreeMap::new();

    for host in hosts {
        debug!("Probing {} ({} backend)", host, backend.name());
        let records = match backend.probe_host(host).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Port probe failed for {}: {}", host, e);
                Vec::new()
            }
        };

        if verbose {
            for record in records.iter().filter(|r| r.state == PortState::Open) {
                info!(
                    "  {}:{} open  {} {}",
                    host, record.port, record.service, record.version
                );
            }
        }
        ports.insert(host.clone(), records);
    }

    ports
}

/// Rich backend: one `nmap -sS -sV` run per host over the top 1000 ports,
/// parsed from grepable output.
pub struct NmapBackend;

#[async_trait]
impl ProbeBackend for NmapBackend {
    fn name(&self) -> &'static str {
        "nmap"
    }

    async fn probe_host(&self, host: &str) -> Result<Vec<PortRecord>, ProbeError> {
        let output = Command::new("nmap")
            .args(["-sS", "-sV", "-T4", "--top-ports", "1000", "-oG", "-"])
            .arg(host)
            .output()
            .await
            .map_err(|e| ProbeError::Spawn {
                host: host.to_string(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ProbeError::ToolFailed {
                host: host.to_string(),
                status: output.status,
            });
        }

        Ok(parse_grepable(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parses nmap grepable (`-oG`) output into port records, preserving the
/// tool's reported state, service name and product+version string.
fn parse_grepable(output: &str) -> Vec<PortRecord> {
    let mut records = Vec::new();

    for line in output.lines() {
        if line.starts_with('#') {
            continue;
        }
        let Some(idx) = line.find("Ports:") else {
            continue;
        };
        // The ports field ends at the next tab-separated field, if any.
        let field = &line[idx + "Ports:".len()..];
        let field = field.split('\t').next().unwrap_or(field);

        for entry in field.split(", ") {
            // port/state/protocol/owner/service/rpcinfo/version
            let parts: Vec<&str> = entry.trim().split('/').collect();
            if parts.len() < 7 {
                continue;
            }
            let Ok(port) = parts[0].parse::<u16>() else {
                continue;
            };
            let state = parts[1].parse().unwrap_or(PortState::Unknown);
            // Grepable output escapes '/' inside fields as '|'.
            let version = parts[6].replace('|', "/").trim().to_string();
            records.push(PortRecord {
                port,
                state,
                service: parts[4].to_string(),
                version,
            });
        }
    }

    records
}

/// Fallback backend: semaphore-bounded TCP connect attempts against the
/// canonical common-port list. Only opens are recorded; a failed or
/// timed-out connect yields nothing.
pub struct ConnectBackend {
    concurrency: usize,
    ports: Vec<u16>,
}

impl ConnectBackend {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ports: FALLBACK_PORTS.to_vec(),
        }
    }

    /// Probe a custom port set instead of the canonical list.
    #[cfg(test)]
    pub fn with_ports(concurrency: usize, ports: Vec<u16>) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ports,
        }
    }
}

#[async_trait]
impl ProbeBackend for ConnectBackend {
    fn name(&self) -> &'static str {
        "connect"
    }

    async fn probe_host(&self, host: &str) -> Result<Vec<PortRecord>, ProbeError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::new();

        for port in self.ports.clone() {
            let host = host.to_string();
            let semaphore = semaphore.clone();
            // One worker per (host, port) pair; each returns a record or
            // nothing, so a refused or timed-out connect can never crash
            // the phase.
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                match timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
                    Ok(Ok(_stream)) => Some(PortRecord {
                        port,
                        state: PortState::Open,
                        service: fallback_service_name(port).to_string(),
                        version: String::new(),
                    }),
                    _ => None,
                }
            }));
        }

        // Keyed by port so the result is identical regardless of
        // completion order or pool width.
        let mut by_port = BTreeMap::new();
        for joined in join_all(tasks).await {
            if let Ok(Some(record)) = joined {
                by_port.insert(record.port, record);
            }
        }

        Ok(by_port.into_values().collect())
    }
}
