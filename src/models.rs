use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed state of a single port.
///
/// The rich backend reports whatever nmap saw; states other than
/// open/closed (filtered, open|filtered, ...) collapse to `Unknown`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Unknown,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for PortState {
    type Err = ();

    /// Never fails: unrecognized states map to `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "open" => PortState::Open,
            "closed" => PortState::Closed,
            _ => PortState::Unknown,
        })
    }
}

/// One observed port on one host. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    pub port: u16,
    pub state: PortState,
    pub service: String,
    /// Product and version concatenated; empty when the backend cannot tell.
    pub version: String,
}

/// A confirmed HTTP(S)-reachable endpoint. Only created on HTTP 200.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebService {
    pub url: String,
    pub status: u16,
    pub server: String,
    pub title: String,
}

/// Output of one vulnerability-check unit for one asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// URL or host the finding refers to.
    pub target: String,
    pub vulnerable: bool,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share: Option<String>,
}

impl Finding {
    pub fn new(target: impl Into<String>, vulnerable: bool, details: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            vulnerable,
            details: details.into(),
            version: None,
            share: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_share(mut self, share: impl Into<String>) -> Self {
        self.share = Some(share.into());
        self
    }
}

/// The shared per-run aggregate. Owned by the orchestrator; each phase
/// writes its slice, the reporting collaborator reads it at the end.
///
/// Ordered maps keep the serialized aggregate deterministic regardless of
/// worker completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResults {
    pub target: String,
    pub hosts: Vec<String>,
    pub ports: BTreeMap<String, Vec<PortRecord>>,
    pub web_services: Vec<WebService>,
    /// One finding list per check category ("wordpress", "smb", ...).
    pub findings: BTreeMap<String, Vec<Finding>>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl ScanResults {
    pub fn new(target: &str) -> Self {
        let now = Utc::now();
        Self {
            target: target.to_string(),
            hosts: Vec::new(),
            ports: BTreeMap::new(),
            web_services: Vec::new(),
            findings: BTreeMap::new(),
            start_time: now,
            end_time: now,
        }
    }

    /// Number of findings across all categories flagged vulnerable.
    pub fn vuln_count(&self) -> usize {
        self.findings
            .values()
            .flatten()
            .filter(|f| f.vulnerable)
            .count()
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_time
            .signed_duration_since(self.start_time)
            .num_milliseconds() as f64
            / 1000.0
    }
}

/// Candidate ports for the web fingerprinting phase.
pub const WEB_PORTS: [u16; 4] = [80, 443, 8080, 8443];

/// Commonly-scanned ports probed by the TCP-connect fallback backend.
pub const FALLBACK_PORTS: [u16; 21] = [
    21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 443, 445, 993, 995, 1723, 3306, 3389, 5900,
    8080, 8443,
];

/// Static port-to-service lookup used by the fallback backend.
pub fn fallback_service_name(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        80 => "http",
        110 => "pop3",
        111 => "rpcbind",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        443 => "https",
        445 => "microsoft-ds",
        993 => "imaps",
        995 => "pop3s",
        1723 => "pptp",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5900 => "vnc",
        8080 => "http-proxy",
        8443 => "https-alt",
        _ => "unknown",
    }
}
