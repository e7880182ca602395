//! IP extraction utilities for WebSocket connections
//!
//! The client IP is the identity that bans apply to, so proxy headers are only
//! honoured when the direct peer is an explicitly trusted proxy.

use log::{debug, warn};
use std::net::{IpAddr, SocketAddr};
use warp::http::HeaderMap;

/// Headers consulted, in order, when the peer is a trusted proxy
const PROXY_HEADERS: [&str; 4] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip", "x-client-ip"];

/// Configuration for IP extraction behavior
#[derive(Debug, Clone, Default)]
pub struct IpExtractionConfig {
    /// Whether to trust proxy headers (X-Forwarded-For, X-Real-IP, etc.)
    pub trust_proxy_headers: bool,
    /// Peers allowed to set those headers
    pub trusted_proxies: Vec<IpAddr>,
}

impl IpExtractionConfig {
    /// Create configuration for running behind trusted proxies
    pub fn behind_proxies(trusted_proxies: Vec<IpAddr>) -> Self {
        Self {
            trust_proxy_headers: true,
            trusted_proxies,
        }
    }
}

/// Extract the client IP address from headers and connection info.
///
/// Returns `None` when no address can be determined; such a client cannot be
/// identified for banning and should be refused.
pub fn extract_client_ip(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    config: &IpExtractionConfig,
) -> Option<IpAddr> {
    let direct_ip = remote_addr.map(|addr| normalize(addr.ip()));

    let from_trusted_proxy = config.trust_proxy_headers
        && direct_ip.map_or(false, |ip| config.trusted_proxies.contains(&ip));

    if from_trusted_proxy {
        for name in PROXY_HEADERS {
            let Some(value) = headers.get(name) else {
                continue;
            };
            let Ok(value) = value.to_str() else {
                warn!("Non-ASCII {} header ignored", name);
                continue;
            };
            // X-Forwarded-For can contain multiple IPs: "client, proxy1, proxy2"
            let candidate = value.split(',').next().unwrap_or("").trim();
            match candidate.parse::<IpAddr>() {
                Ok(ip) => {
                    debug!("Extracted IP from {}: {}", name, ip);
                    return Some(normalize(ip));
                }
                Err(_) => warn!("Invalid IP format in {} header: {}", name, candidate),
            }
        }
        warn!("Could not extract client IP from proxy headers, using proxy IP");
    }

    if direct_ip.is_none() {
        warn!("No remote address available for connection");
    }
    direct_ip
}

/// Fold IPv4-mapped IPv6 addresses to plain IPv4 so one client has one identity
fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::http::HeaderValue;

    #[test]
    fn test_ip_extraction_no_proxy() {
        let config = IpExtractionConfig::default();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.4"));
        let remote_addr = Some("203.0.113.1:12345".parse().unwrap());

        let result = extract_client_ip(&headers, remote_addr, &config);
        assert_eq!(result, Some("203.0.113.1".parse().unwrap()));
    }

    #[test]
    fn test_ip_extraction_with_proxy() {
        let config = IpExtractionConfig::behind_proxies(vec!["203.0.113.100".parse().unwrap()]);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.4, 203.0.113.100"));
        let remote_addr = Some("203.0.113.100:12345".parse().unwrap());

        let result = extract_client_ip(&headers, remote_addr, &config);
        assert_eq!(result, Some("198.51.100.4".parse().unwrap()));
    }

    #[test]
    fn test_untrusted_peer_cannot_spoof() {
        let config = IpExtractionConfig::behind_proxies(vec!["203.0.113.100".parse().unwrap()]);
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        let remote_addr = Some("203.0.113.7:12345".parse().unwrap());

        let result = extract_client_ip(&headers, remote_addr, &config);
        assert_eq!(result, Some("203.0.113.7".parse().unwrap()));
    }

    #[test]
    fn test_mapped_ipv6_is_folded() {
        let config = IpExtractionConfig::default();
        let remote_addr = Some("[::ffff:192.0.2.5]:80".parse().unwrap());
        let result = extract_client_ip(&HeaderMap::new(), remote_addr, &config);
        assert_eq!(result, Some("192.0.2.5".parse().unwrap()));
        assert_eq!(extract_client_ip(&HeaderMap::new(), None, &config), None);
    }
}
