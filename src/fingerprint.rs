use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{info, warn};
use rand::Rng;
use reqwest::header;
use reqwest::Client;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;

use crate::models::WebService;

/// Per-request timeout for fingerprint probes.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Plausible browser user agents; one is picked at random per request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

fn random_user_agent() -> &'static str {
    USER_AGENTS[rand::thread_rng().gen_range(0..USER_AGENTS.len())]
}

/// URL construction rule: HTTPS only for 443, plain HTTP otherwise.
pub fn service_url(host: &str, port: u16) -> String {
    if port == 443 {
        format!("https://{}", host)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// Builds the fingerprinting HTTP client.
///
/// Certificate verification is disabled on purpose: self-signed
/// certificates on internal hosts would otherwise turn into false
/// negatives. This is a recon tool trade-off, not a transport for
/// sensitive data.
fn build_client() -> reqwest::Result<Client> {
    Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(HTTP_TIMEOUT)
        .build()
}

/// Fingerprints a (host × port) candidate set with a bounded worker
/// pool. Every probe failure is swallowed: the pair simply yields no
/// entry and never disturbs its siblings.
pub async fn fingerprint_ports(
    hosts: &[String],
    ports: &[u16],
    concurrency: usize,
    verbose: bool,
) -> Vec<WebService> {
    let client = match build_client() {
        Ok(client) => client,
        Err(e) => {
            warn!("Failed to build HTTP client, skipping web fingerprinting: {}", e);
            return Vec::new();
        }
    };

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::new();

    for (host_idx, host) in hosts.iter().enumerate() {
        for &port in ports {
            let client = client.clone();
            let host = host.clone();
            let semaphore = semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                let service = check_web_service(&client, &host, port).await?;
                Some(((host_idx, port), service))
            }));
        }
    }

    // Keyed by (host, port) so the output ordering is deterministic no
    // matter which worker finishes first.
    let mut by_pair = BTreeMap::new();
    for joined in join_all(tasks).await {
        if let Ok(Some((key, service))) = joined {
            if verbose {
                info!(
                    "  Web service: {} | Server: {} | Title: {}",
                    service.url, service.server, service.title
                );
            }
            by_pair.insert(key, service);
        }
    }

    by_pair.into_values().collect()
}

/// Probes one (host, port) pair. Only an HTTP 200 produces a service
/// entry; anything else, transport errors included, yields `None`.
async fn check_web_service(client: &Client, host: &str, port: u16) -> Option<WebService> {
    let url = service_url(host, port);
    let response = client
        .get(&url)
        .header(header::USER_AGENT, random_user_agent())
        .send()
        .await
        .ok()?;

    let status = response.status().as_u16();
    if status != 200 {
        return None;
    }

    let server = response
        .headers()
        .get(header::SERVER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("Unknown")
        .to_string();
    let body = response.text().await.ok()?;

    Some(WebService {
        url,
        status,
        server,
        title: extract_title(&body),
    })
}

/// Pulls the text of the first `<title>` element out of an HTML body.
fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("title") else {
        return "No Title".to_string();
    };

    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| "No Title".to_string())
}
