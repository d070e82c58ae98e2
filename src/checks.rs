//! Pluggable vulnerability-check units.
//!
//! Each unit consumes exactly the asset slice it declares (the discovered
//! web services, or the first host's port records), and returns findings
//! under its own category key. The orchestrator stores findings without
//! interpreting them.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use reqwest::Client;

use crate::models::{Finding, PortRecord, PortState, WebService};

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Which slice of the aggregate a check unit wants.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssetKind {
    /// The discovered web services.
    WebServices,
    /// The first host's port records.
    HostPorts,
}

/// Asset slice handed to a check unit.
pub enum Assets<'a> {
    Web(&'a [WebService]),
    Ports {
        host: &'a str,
        records: &'a [PortRecord],
    },
}

/// Contract every vulnerability-check unit implements.
#[async_trait]
pub trait VulnCheck: Send + Sync {
    /// Category key the findings are stored under.
    fn category(&self) -> &'static str;

    fn asset_kind(&self) -> AssetKind;

    async fn scan(&self, assets: Assets<'_>) -> Vec<Finding>;
}

/// The check units run on every scan, in report order.
pub fn default_checks() -> Vec<Box<dyn VulnCheck>> {
    vec![
        Box::new(WordPressCheck),
        Box::new(CraftCmsCheck),
        Box::new(SmbCheck),
        Box::new(ZyxelCheck),
    ]
}

fn check_client() -> Option<Client> {
    match Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(CHECK_TIMEOUT)
        .build()
    {
        Ok(client) => Some(client),
        Err(e) => {
            warn!("Failed to build HTTP client for checks: {}", e);
            None
        }
    }
}

/// One GET against a discovered service; per-probe failures skip the
/// service without disturbing the rest of the check.
async fn fetch(client: &Client, url: &str) -> Option<(HeaderMap, String)> {
    let response = client.get(url).send().await.ok()?;
    if response.status().as_u16() != 200 {
        return None;
    }
    let headers = response.headers().clone();
    let body = response.text().await.ok()?;
    Some((headers, body))
}

/// Numeric dotted-version comparison: `true` when `version < threshold`.
fn version_lt(version: &str, threshold: &str) -> bool {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.')
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(version), parse(threshold));
    for i in 0..a.len().max(b.len()) {
        let (x, y) = (
            a.get(i).copied().unwrap_or(0),
            b.get(i).copied().unwrap_or(0),
        );
        if x != y {
            return x < y;
        }
    }
    false
}

// --- WordPress ---

static RE_WP_GENERATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"WordPress ([\d.]+)").unwrap());
static RE_WP_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/wp-content/|/wp-includes/|wp-login\.php").unwrap());

/// Versions older than this are treated as out of the supported line.
const WP_CURRENT: &str = "6.0";

pub struct WordPressCheck;

#[async_trait]
impl VulnCheck for WordPressCheck {
    fn category(&self) -> &'static str {
        "wordpress"
    }

    fn asset_kind(&self) -> AssetKind {
        AssetKind::WebServices
    }

    async fn scan(&self, assets: Assets<'_>) -> Vec<Finding> {
        let Assets::Web(services) = assets else {
            return Vec::new();
        };
        let Some(client) = check_client() else {
            return Vec::new();
        };

        let mut findings = Vec::new();
        for service in services {
            debug!("WordPress check against {}", service.url);
            let Some((_, body)) = fetch(&client, &service.url).await else {
                continue;
            };

            if let Some(caps) = RE_WP_GENERATOR.captures(&body) {
                let version = caps[1].to_string();
                let vulnerable = version_lt(&version, WP_CURRENT);
                let details = if vulnerable {
                    "Outdated WordPress core with publicly known vulnerabilities"
                } else {
                    "WordPress detected, core version is current"
                };
                findings.push(
                    Finding::new(&service.url, vulnerable, details).with_version(version),
                );
            } else if RE_WP_MARKERS.is_match(&body) {
                findings.push(Finding::new(
                    &service.url,
                    false,
                    "WordPress detected, version not disclosed",
                ));
            }
        }
        findings
    }
}

// --- Craft CMS ---

static RE_CRAFT_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Craft CMS[/ ]([\d.]+)").unwrap());

/// First Craft 3 release with the template-injection fix.
const CRAFT_FIXED: &str = "3.7.14";

pub struct CraftCmsCheck;

#[async_trait]
impl VulnCheck for CraftCmsCheck {
    fn category(&self) -> &'static str {
        "craftcms"
    }

    fn asset_kind(&self) -> AssetKind {
        AssetKind::WebServices
    }

    async fn scan(&self, assets: Assets<'_>) -> Vec<Finding> {
        let Assets::Web(services) = assets else {
            return Vec::new();
        };
        let Some(client) = check_client() else {
            return Vec::new();
        };

        let mut findings = Vec::new();
        for service in services {
            debug!("Craft CMS check against {}", service.url);
            let Some((headers, body)) = fetch(&client, &service.url).await else {
                continue;
            };

            let powered_by = headers
                .get("x-powered-by")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !powered_by.contains("Craft CMS") && !body.contains("Craft CMS") {
                continue;
            }

            let version = RE_CRAFT_VERSION
                .captures(powered_by)
                .or_else(|| RE_CRAFT_VERSION.captures(&body))
                .map(|caps| caps[1].to_string());

            match version {
                Some(version) if version_lt(&version, CRAFT_FIXED) => {
                    findings.push(
                        Finding::new(
                            &service.url,
                            true,
                            "Craft CMS version affected by known remote code execution",
                        )
                        .with_version(version),
                    );
                }
                Some(version) => {
                    findings.push(
                        Finding::new(&service.url, false, "Craft CMS detected, patched version")
                            .with_version(version),
                    );
                }
                None => {
                    findings.push(Finding::new(
                        &service.url,
                        false,
                        "Craft CMS detected, version not disclosed",
                    ));
                }
            }
        }
        findings
    }
}

// --- SMB ---

static RE_LEGACY_SAMBA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Samba (?:[0-2]\.|3\.)").unwrap());

pub struct SmbCheck;

#[async_trait]
impl VulnCheck for SmbCheck {
    fn category(&self) -> &'static str {
        "smb"
    }

    fn asset_kind(&self) -> AssetKind {
        AssetKind::HostPorts
    }

    async fn scan(&self, assets: Assets<'_>) -> Vec<Finding> {
        let Assets::Ports { host, records } = assets else {
            return Vec::new();
        };

        let mut findings = Vec::new();
        for record in records
            .iter()
            .filter(|r| r.state == PortState::Open && (r.port == 445 || r.port == 139))
        {
            if RE_LEGACY_SAMBA.is_match(&record.version) {
                findings.push(
                    Finding::new(
                        host,
                        true,
                        format!(
                            "Legacy Samba ({}) on port {}, end-of-life release line",
                            record.version, record.port
                        ),
                    )
                    .with_share("unknown"),
                );
            } else {
                findings.push(Finding::new(
                    host,
                    false,
                    format!("SMB service exposed on port {}", record.port),
                ));
            }
        }
        findings
    }
}

// --- Zyxel ---

static RE_ZYXEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)zyxel|zywall|usg flex").unwrap());

pub struct ZyxelCheck;

#[async_trait]
impl VulnCheck for ZyxelCheck {
    fn category(&self) -> &'static str {
        "zyxel"
    }

    fn asset_kind(&self) -> AssetKind {
        AssetKind::WebServices
    }

    async fn scan(&self, assets: Assets<'_>) -> Vec<Finding> {
        let Assets::Web(services) = assets else {
            return Vec::new();
        };

        services
            .iter()
            .filter(|s| RE_ZYXEL.is_match(&s.server) || RE_ZYXEL.is_match(&s.title))
            .map(|s| {
                Finding::new(
                    &s.url,
                    true,
                    "Zyxel device management interface exposed to the network",
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn web_service(url: &str, server: &str, title: &str) -> WebService {
        WebService {
            url: url.to_string(),
            status: 200,
            server: server.to_string(),
            title: title.to_string(),
        }
    }

    fn open_port(port: u16, service: &str, version: &str) -> PortRecord {
        PortRecord {
            port,
            state: PortState::Open,
            service: service.to_string(),
            version: version.to_string(),
        }
    }

    /// Serves the same canned response for every connection until the
    /// test's runtime shuts down.
    async fn canned_server(headers: &'static str, body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    headers,
                    body.len(),
                    body
                );
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        port
    }

    #[test]
    fn version_comparison_is_numeric_not_lexical() {
        assert!(version_lt("4.9.1", "6.0"));
        assert!(version_lt("5.9", "5.10"));
        assert!(!version_lt("6.0", "6.0"));
        assert!(!version_lt("6.4.2", "6.0"));
        assert!(version_lt("3.7.13", "3.7.14"));
    }

    #[tokio::test]
    async fn wordpress_check_flags_outdated_generator_version() {
        let port = canned_server(
            "",
            "<html><head><meta name=\"generator\" content=\"WordPress 4.9.1\"></head></html>",
        )
        .await;
        let services = vec![web_service(
            &format!("http://127.0.0.1:{}", port),
            "Apache",
            "Blog",
        )];

        let findings = WordPressCheck.scan(Assets::Web(&services)).await;

        assert_eq!(findings.len(), 1);
        assert!(findings[0].vulnerable);
        assert_eq!(findings[0].version.as_deref(), Some("4.9.1"));
    }

    #[tokio::test]
    async fn wordpress_check_reports_markers_without_version_as_informational() {
        let port = canned_server(
            "",
            "<html><script src=\"/wp-includes/js/jquery.js\"></script></html>",
        )
        .await;
        let services = vec![web_service(
            &format!("http://127.0.0.1:{}", port),
            "nginx",
            "Site",
        )];

        let findings = WordPressCheck.scan(Assets::Web(&services)).await;

        assert_eq!(findings.len(), 1);
        assert!(!findings[0].vulnerable);
        assert!(findings[0].version.is_none());
    }

    #[tokio::test]
    async fn wordpress_check_skips_unreachable_services() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let services = vec![web_service(
            &format!("http://127.0.0.1:{}", port),
            "Apache",
            "Blog",
        )];
        let findings = WordPressCheck.scan(Assets::Web(&services)).await;
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn craft_check_flags_vulnerable_version_from_header() {
        let port = canned_server(
            "X-Powered-By: Craft CMS/3.6.0\r\n",
            "<html><body>welcome</body></html>",
        )
        .await;
        let services = vec![web_service(
            &format!("http://127.0.0.1:{}", port),
            "nginx",
            "Shop",
        )];

        let findings = CraftCmsCheck.scan(Assets::Web(&services)).await;

        assert_eq!(findings.len(), 1);
        assert!(findings[0].vulnerable);
        assert_eq!(findings[0].version.as_deref(), Some("3.6.0"));
    }

    #[tokio::test]
    async fn smb_check_flags_legacy_samba_and_reports_exposure() {
        let records = vec![
            open_port(445, "microsoft-ds", "Samba 3.6.3"),
            open_port(139, "netbios-ssn", ""),
            open_port(80, "http", "nginx 1.18.0"),
        ];

        let findings = SmbCheck
            .scan(Assets::Ports {
                host: "192.0.2.7",
                records: &records,
            })
            .await;

        assert_eq!(findings.len(), 2);
        assert!(findings[0].vulnerable);
        assert_eq!(findings[0].share.as_deref(), Some("unknown"));
        assert!(!findings[1].vulnerable);
        assert!(findings.iter().all(|f| f.target == "192.0.2.7"));
    }

    #[tokio::test]
    async fn smb_check_is_empty_without_smb_ports() {
        let records = vec![open_port(22, "ssh", "OpenSSH 8.9")];
        let findings = SmbCheck
            .scan(Assets::Ports {
                host: "192.0.2.7",
                records: &records,
            })
            .await;
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn zyxel_check_matches_banner_or_title() {
        let services = vec![
            web_service("http://192.0.2.9:80", "ZyWALL Web Server", "Login"),
            web_service("http://192.0.2.9:8080", "nginx", "ZyXEL USG FLEX 100"),
            web_service("http://192.0.2.9:8443", "Apache", "Intranet"),
        ];

        let findings = ZyxelCheck.scan(Assets::Web(&services)).await;

        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.vulnerable));
    }

    #[tokio::test]
    async fn checks_return_nothing_for_the_wrong_asset_kind() {
        let findings = ZyxelCheck
            .scan(Assets::Ports {
                host: "192.0.2.1",
                records: &[],
            })
            .await;
        assert!(findings.is_empty());

        let findings = SmbCheck.scan(Assets::Web(&[])).await;
        assert!(findings.is_empty());
    }

    #[test]
    fn default_checks_cover_all_report_categories() {
        let categories: Vec<&str> = default_checks().iter().map(|c| c.category()).collect();
        assert_eq!(categories, vec!["wordpress", "craftcms", "smb", "zyxel"]);
    }
}
