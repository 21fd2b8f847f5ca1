//! Remote source address checks
//!
//! A remote source must not make the service fetch from itself or from its
//! private network. The host is rejected when it is a loopback, private,
//! link-local or otherwise internal address, either literally or after DNS
//! resolution.

use crate::fetch::SourceFetchError;
use std::net::{IpAddr, Ipv6Addr};
use tokio::net::lookup_host;

/// Reject `url` when it points at an internal address.
pub async fn check_remote_source(url: &reqwest::Url) -> Result<(), SourceFetchError> {
    let blocked = |reason: String| SourceFetchError::Blocked(format!("{}: {}", url, reason));

    let host = url
        .host_str()
        .ok_or_else(|| blocked("missing host".to_string()))?;
    if is_internal_host(host) {
        return Err(blocked("internal host".to_string()));
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match lookup_host((bare, port)).await {
        Ok(addrs) => {
            for addr in addrs {
                if is_private_ip(&addr.ip()) {
                    return Err(blocked(format!("resolves to {}", addr.ip())));
                }
            }
        }
        // Fetching fails on its own when the name does not resolve.
        Err(e) => tracing::warn!(host = %host, error = %e, "Failed to resolve source host"),
    }

    Ok(())
}

/// Literal internal addresses and internal host names; no DNS involved.
pub fn is_internal_host(host: &str) -> bool {
    let host = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_lowercase();

    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_private_ip(&ip);
    }

    host == "localhost"
        || host.ends_with(".localhost")
        || host.ends_with(".local")
        || host.ends_with(".internal")
        || host.ends_with(".corp")
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            a == 0
                || a == 10
                || a == 127
                || (a == 100 && (64..=127).contains(&b))
                || (a == 169 && b == 254)
                || (a == 172 && (16..=31).contains(&b))
                || (a == 192 && b == 168)
                || a >= 224
        }
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_ip(&IpAddr::V4(v4)),
            None => {
                v6.is_loopback()
                    || v6.is_unspecified()
                    || v6.is_multicast()
                    || is_ipv6_link_local(v6)
                    || is_ipv6_unique_local(v6)
            }
        },
    }
}

/// fe80::/10
fn is_ipv6_link_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xffc0 == 0xfe80
}

/// fc00::/7
fn is_ipv6_unique_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xfe00 == 0xfc00
}
