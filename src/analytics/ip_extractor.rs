//! Client IP extraction from HTTP headers with trust validation
//!
//! Forwarding headers are honoured only as far as the trust configuration
//! allows. Anything else falls back to the socket peer address.

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

/// Extract the client IP address according to the trusted-proxy policy
pub fn extract_client_ip(headers: &HeaderMap, socket_addr: IpAddr, config: &AnalyticsConfig) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => header_ip(headers, "cf-connecting-ip").unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => {
            if !peer_is_trusted(socket_addr, config) {
                return socket_addr;
            }
            let chain = forwarded_chain(headers);
            pick_from_chain(&chain, config).unwrap_or(socket_addr)
        }
        TrustedProxyMode::None => socket_addr,
    }
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// With a CIDR list configured, only accept forwarding headers from those peers
fn peer_is_trusted(peer: IpAddr, config: &AnalyticsConfig) -> bool {
    config.trusted_proxies.is_empty() || config.trusted_proxies.iter().any(|net| net.contains(&peer))
}

/// Hop addresses, client first. RFC 7239 `Forwarded` wins over `X-Forwarded-For`.
fn forwarded_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    let from_forwarded: Vec<IpAddr> = headers
        .get_all("forwarded")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|element| {
            element
                .split(';')
                .map(str::trim)
                .find_map(|param| {
                    let (name, value) = param.split_once('=')?;
                    name.eq_ignore_ascii_case("for").then_some(value)
                })
                .and_then(parse_forwarded_node)
        })
        .collect();

    if !from_forwarded.is_empty() {
        return from_forwarded;
    }

    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect()
}

/// `for=` node: `192.0.2.60`, `"192.0.2.60:8080"` or `"[2001:db8::1]:443"`
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = value.parse() {
        return Some(ip);
    }
    value.rsplit_once(':').and_then(|(host, _)| host.parse().ok())
}

/// Walk right to left, skipping hops we trust
fn pick_from_chain(chain: &[IpAddr], config: &AnalyticsConfig) -> Option<IpAddr> {
    if chain.is_empty() {
        return None;
    }

    if let Some(num_trusted) = config.num_trusted_proxies {
        return if chain.len() > num_trusted {
            Some(chain[chain.len() - num_trusted - 1])
        } else {
            chain.first().copied()
        };
    }

    if !config.trusted_proxies.is_empty() {
        return chain
            .iter()
            .rev()
            .find(|ip| !config.trusted_proxies.iter().any(|net| net.contains(*ip)))
            .or_else(|| chain.first())
            .copied();
    }

    chain.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::http::HeaderValue;

    fn config(mode: TrustedProxyMode) -> AnalyticsConfig {
        AnalyticsConfig {
            trusted_proxy_mode: mode,
            ..Config::default().analytics
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn none_mode_ignores_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        let result = extract_client_ip(&headers, ip("192.168.1.1"), &config(TrustedProxyMode::None));
        assert_eq!(result, ip("192.168.1.1"));
    }

    #[test]
    fn cloudflare_header() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.1"));
        let result =
            extract_client_ip(&headers, ip("192.168.1.1"), &config(TrustedProxyMode::Cloudflare));
        assert_eq!(result, ip("203.0.113.1"));
    }

    #[test]
    fn x_forwarded_for_rightmost_without_trust_list() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1"),
        );
        let result =
            extract_client_ip(&headers, ip("192.168.1.1"), &config(TrustedProxyMode::Standard));
        assert_eq!(result, ip("198.51.100.1"));
    }

    #[test]
    fn trusted_cidrs_are_skipped() {
        let mut cfg = config(TrustedProxyMode::Standard);
        cfg.trusted_proxies = vec!["10.0.0.0/8".parse().unwrap()];

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.1.2.3, 10.0.0.2"),
        );
        assert_eq!(extract_client_ip(&headers, ip("10.0.0.1"), &cfg), ip("203.0.113.7"));

        // Untrusted peer cannot spoof the chain
        assert_eq!(extract_client_ip(&headers, ip("198.51.100.9"), &cfg), ip("198.51.100.9"));
    }

    #[test]
    fn forwarded_header_nodes() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "forwarded",
            HeaderValue::from_static("for=\"[2001:db8::1]:443\";proto=https, for=192.0.2.60:8080"),
        );
        assert_eq!(forwarded_chain(&headers), vec![ip("2001:db8::1"), ip("192.0.2.60")]);
    }
}
