use std::net::IpAddr;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use ipnet::IpNet;
use log::{debug, info};
use thiserror::Error;

/// Failure to turn a target spec into any concrete host.
///
/// Fatal for the whole run: with zero hosts no later phase can produce
/// meaningful results.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid network block '{spec}': {reason}")]
    InvalidBlock { spec: String, reason: String },
    #[error("could not resolve '{spec}': {reason}")]
    Unresolvable { spec: String, reason: String },
}

/// Expands a target spec into a concrete, ordered list of host addresses.
///
/// A spec containing `/` is treated as CIDR notation and expanded to every
/// usable address in the block (network and broadcast excluded per standard
/// semantics), in ascending order. Anything else is a single IP literal or a
/// hostname resolved through the system resolver.
pub async fn resolve_targets(spec: &str) -> Result<Vec<String>, ResolveError> {
    if spec.contains('/') {
        let net: IpNet = spec.parse().map_err(|e| ResolveError::InvalidBlock {
            spec: spec.to_string(),
            reason: format!("{}", e),
        })?;
        let hosts: Vec<String> = net.hosts().map(|ip| ip.to_string()).collect();
        info!("Expanded block {} to {} hosts", spec, hosts.len());
        return Ok(hosts);
    }

    // An IP literal short-circuits name resolution.
    if let Ok(ip) = spec.parse::<IpAddr>() {
        debug!("Target {} is an IP literal", ip);
        return Ok(vec![ip.to_string()]);
    }

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
    let lookup = resolver
        .lookup_ip(spec)
        .await
        .map_err(|e| ResolveError::Unresolvable {
            spec: spec.to_string(),
            reason: format!("{}", e),
        })?;

    let ip = lookup
        .iter()
        .next()
        .ok_or_else(|| ResolveError::Unresolvable {
            spec: spec.to_string(),
            reason: "name resolved to no addresses".to_string(),
        })?;

    info!("Resolved {} to {}", spec, ip);
    Ok(vec![ip.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slash_30_block_yields_two_usable_hosts() {
        let hosts = resolve_targets("192.168.10.0/30").await.unwrap();
        assert_eq!(hosts, vec!["192.168.10.1", "192.168.10.2"]);
    }

    #[tokio::test]
    async fn block_expansion_masks_host_bits() {
        // Same behavior as non-strict parsing: 10.0.0.5/30 covers 10.0.0.4/30.
        let hosts = resolve_targets("10.0.0.5/30").await.unwrap();
        assert_eq!(hosts, vec!["10.0.0.5", "10.0.0.6"]);
    }

    #[tokio::test]
    async fn slash_24_block_excludes_network_and_broadcast() {
        let hosts = resolve_targets("172.16.0.0/24").await.unwrap();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts.first().unwrap(), "172.16.0.1");
        assert_eq!(hosts.last().unwrap(), "172.16.0.254");
    }

    #[tokio::test]
    async fn ip_literal_resolves_to_itself() {
        let hosts = resolve_targets("203.0.113.5").await.unwrap();
        assert_eq!(hosts, vec!["203.0.113.5"]);
    }

    #[tokio::test]
    async fn invalid_block_is_an_error() {
        let err = resolve_targets("10.0.0.1/40").await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidBlock { .. }));
    }

    #[tokio::test]
    #[ignore] // requires a working DNS resolver
    async fn unresolvable_hostname_is_an_error() {
        let err = resolve_targets("host-that-does-not-exist.invalid")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Unresolvable { .. }));
    }
}
