use anyhow::Result;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};

use crate::checks::{default_checks, AssetKind, Assets, VulnCheck};
use crate::fingerprint;
use crate::models::{ScanResults, WEB_PORTS};
use crate::probe::{self, ProbeBackend};
use crate::resolver;

/// Drives one full reconnaissance run over a single owned aggregate.
///
/// Phases are strictly sequential: Resolve -> Probe Ports -> Fingerprint
/// Web -> one pass per check unit -> Assemble. Work inside the probe and
/// fingerprint phases is concurrent, but no phase starts before the
/// previous one has drained its worker pool.
pub struct ReconScanner {
    target: String,
    threads: usize,
    verbose: bool,
    checks: Vec<Box<dyn VulnCheck>>,
    backend_override: Option<Box<dyn ProbeBackend>>,
    web_ports: Vec<u16>,
}

impl ReconScanner {
    pub fn new(target: &str, threads: usize, verbose: bool) -> Self {
        Self {
            target: target.to_string(),
            threads,
            verbose,
            checks: default_checks(),
            backend_override: None,
            web_ports: WEB_PORTS.to_vec(),
        }
    }

    /// Pin the probe backend instead of detecting one at startup.
    #[cfg(test)]
    pub fn with_backend(mut self, backend: Box<dyn ProbeBackend>) -> Self {
        self.backend_override = Some(backend);
        self
    }

    #[cfg(test)]
    pub fn with_web_ports(mut self, ports: Vec<u16>) -> Self {
        self.web_ports = ports;
        self
    }

    /// Runs the pipeline to completion and returns the aggregate.
    ///
    /// Only resolution failure aborts the run; every later error is local
    /// to one host, port or probe and has already been absorbed by the
    /// owning phase.
    pub async fn run(mut self) -> Result<ScanResults> {
        let mut results = ScanResults::new(&self.target);
        results.start_time = Utc::now();

        // Discovery counts as one step, then one per check unit, then
        // report assembly. Observability only.
        let progress = ProgressBar::new(2 + self.checks.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:30.cyan} {pos}/{len} {msg}") {
            progress.set_style(style);
        }

        // Phase 1: resolve targets. Fatal when it fails: no hosts means
        // no later phase can produce anything.
        progress.set_message("discovering assets");
        info!("Starting scan of target: {}", self.target);
        let hosts = resolver::resolve_targets(&self.target).await?;
        results.hosts = hosts.clone();

        // Phase 2: probe ports. Backend chosen once per run.
        let backend = match self.backend_override.take() {
            Some(backend) => backend,
            None => probe::detect_backend(self.threads).await,
        };
        info!("Probing ports on {} host(s)", hosts.len());
        results.ports = probe::probe_hosts(backend.as_ref(), &hosts, self.verbose).await;

        // Phase 3: fingerprint web services.
        info!("Fingerprinting web services");
        results.web_services =
            fingerprint::fingerprint_ports(&hosts, &self.web_ports, self.threads, self.verbose)
                .await;
        progress.inc(1);

        // Phases 4..: one pass per check unit, each over exactly the
        // asset slice it declares.
        for check in &self.checks {
            progress.set_message(format!("{} check", check.category()));
            debug!("Running {} check", check.category());
            let findings = match check.asset_kind() {
                AssetKind::WebServices => check.scan(Assets::Web(&results.web_services)).await,
                AssetKind::HostPorts => {
                    let host = results
                        .hosts
                        .first()
                        .map(String::as_str)
                        .unwrap_or(&self.target);
                    let records = results.ports.get(host).map(Vec::as_slice).unwrap_or(&[]);
                    check
                        .scan(Assets::Ports { host, records })
                        .await
                }
            };
            results.findings.insert(check.category().to_string(), findings);
            progress.inc(1);
        }

        // Final phase: assemble.
        results.end_time = Utc::now();
        progress.inc(1);
        progress.finish_and_clear();

        info!(
            "Scan complete: {} host(s), {} web service(s), {} vulnerabilit(ies)",
            results.hosts.len(),
            results.web_services.len(),
            results.vuln_count()
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PortRecord;
    use crate::probe::ProbeError;
    use async_trait::async_trait;
    use tokio::net::TcpListener;

    /// Backend whose probes all fail, like an unreachable host.
    struct UnreachableBackend;

    #[async_trait]
    impl ProbeBackend for UnreachableBackend {
        fn name(&self) -> &'static str {
            "unreachable"
        }
        async fn probe_host(&self, host: &str) -> Result<Vec<PortRecord>, ProbeError> {
            Err(ProbeError::Spawn {
                host: host.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::HostUnreachable, "no route"),
            })
        }
    }

    async fn closed_loopback_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    async fn run_against_dead_host() -> ScanResults {
        let port = closed_loopback_port().await;
        ReconScanner::new("127.0.0.1", 10, false)
            .with_backend(Box::new(UnreachableBackend))
            .with_web_ports(vec![port])
            .run()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn unreachable_target_completes_with_empty_results() {
        let results = run_against_dead_host().await;

        assert_eq!(results.hosts, vec!["127.0.0.1"]);
        assert_eq!(results.ports.len(), 1);
        assert!(results.ports["127.0.0.1"].is_empty());
        assert!(results.web_services.is_empty());
        assert_eq!(results.vuln_count(), 0);
        // Every category is present, every finding list empty.
        assert_eq!(results.findings.len(), 4);
        assert!(results.findings.values().all(Vec::is_empty));
    }

    #[tokio::test]
    async fn pipeline_is_idempotent_on_an_empty_target() {
        let first = run_against_dead_host().await;
        let second = run_against_dead_host().await;

        assert_eq!(first.vuln_count(), 0);
        assert_eq!(second.vuln_count(), 0);
        assert_eq!(first.hosts, second.hosts);
        assert_eq!(first.ports, second.ports);
        assert!(second.findings.values().all(Vec::is_empty));
    }

    #[tokio::test]
    async fn resolution_failure_aborts_the_run() {
        let err = ReconScanner::new("10.0.0.0/99", 10, false)
            .run()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid network block"));
    }

    #[tokio::test]
    async fn open_ports_land_under_the_owning_host() {
        struct FixedBackend;

        #[async_trait]
        impl ProbeBackend for FixedBackend {
            fn name(&self) -> &'static str {
                "fixed"
            }
            async fn probe_host(&self, _host: &str) -> Result<Vec<PortRecord>, ProbeError> {
                Ok(vec![PortRecord {
                    port: 445,
                    state: crate::models::PortState::Open,
                    service: "microsoft-ds".to_string(),
                    version: "Samba 3.0.28".to_string(),
                }])
            }
        }

        let port = closed_loopback_port().await;
        let results = ReconScanner::new("127.0.0.1", 4, false)
            .with_backend(Box::new(FixedBackend))
            .with_web_ports(vec![port])
            .run()
            .await
            .unwrap();

        assert_eq!(results.ports["127.0.0.1"].len(), 1);
        // The SMB check saw the first host's records and flagged the
        // legacy version.
        assert_eq!(results.vuln_count(), 1);
        assert!(results.findings["smb"][0].vulnerable);
    }
}
