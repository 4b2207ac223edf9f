//! Domain-glob and CIDR matching primitives.

use ipnet::IpNet;
use std::net::IpAddr;

/// Case-insensitive hostname match against an exact name or `*.<suffix>`
/// prefix wildcard. The wildcard matches any name ending in `.<suffix>` and
/// the bare apex itself. Empty pattern or hostname never matches.
pub fn match_domain(pattern: &str, hostname: &str) -> bool {
    if pattern.is_empty() || hostname.is_empty() {
        return false;
    }
    let pattern = pattern.to_ascii_lowercase();
    let hostname = hostname.to_ascii_lowercase();

    if let Some(suffix) = pattern.strip_prefix("*.") {
        hostname == suffix || hostname.ends_with(&format!(".{suffix}"))
    } else {
        pattern == hostname
    }
}

/// Check whether `ip` falls inside `cidr`. A bare address is treated as a
/// host-length network. Any parse failure is a non-match, never an error.
pub fn match_ip(cidr: &str, ip: IpAddr) -> bool {
    let net = if cidr.contains('/') {
        match cidr.parse::<IpNet>() {
            Ok(net) => net,
            Err(_) => return false,
        }
    } else {
        match cidr.parse::<IpAddr>() {
            Ok(addr) => IpNet::from(addr),
            Err(_) => return false,
        }
    };
    net.contains(&ip)
}
