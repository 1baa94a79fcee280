//! Input validation for pfwd
//!
//! This module provides centralized validation for all operator-supplied
//! fields before they reach the rule builder or any elevated command.
//!
//! The port and address checks deliberately mirror the permissive syntactic
//! heuristics of classic shell-based forwarders: IPv4 octets are not
//! range-checked and the IPv6 grammar is a loose hextet scan, not RFC 4291.
//! Tightening either would silently change which inputs round-trip, so the
//! stricter checks live only in the advisory helpers below.

use crate::core::forward::AddrFamily;

/// Validates a port entered as text.
///
/// True iff the string is a base-10 integer literal in `[1, 65535]` with no
/// sign, whitespace, or other non-digit characters.
pub fn validate_port(value: &str) -> bool {
    parse_port(value).is_some()
}

/// Parses a port string under the same rules as [`validate_port`].
pub fn parse_port(value: &str) -> Option<u16> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match value.parse::<u32>() {
        Ok(n) if (1..=65_535).contains(&n) => Some(n as u16),
        _ => None,
    }
}

/// Validates a remote address for the given family.
///
/// Syntactic only. IPv4 requires exactly four dot-separated groups of 1-3
/// digits (`999.999.999.999` passes). IPv6 requires at least two
/// colon-separated groups of 0-4 hex digits each (`::1` passes).
pub fn validate_addr(family: AddrFamily, value: &str) -> bool {
    match family {
        AddrFamily::V4 => validate_ipv4(value),
        AddrFamily::V6 => validate_ipv6(value),
    }
}

fn validate_ipv4(value: &str) -> bool {
    let groups: Vec<&str> = value.split('.').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|g| (1..=3).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_digit()))
}

fn validate_ipv6(value: &str) -> bool {
    if !value.contains(':') {
        return false;
    }
    let groups: Vec<&str> = value.split(':').collect();
    (2..=9).contains(&groups.len())
        && groups
            .iter()
            .all(|g| g.len() <= 4 && g.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Checks if a local port is well-known and returns an informational note.
///
/// Informational only; never blocks the add.
pub fn check_well_known_port(port: u16) -> Option<String> {
    if port <= 1024 {
        let name = match port {
            22 => "SSH",
            80 => "HTTP",
            443 => "HTTPS",
            53 => "DNS",
            25 => "SMTP",
            21 => "FTP",
            _ => return Some(format!("Privileged port {port}")),
        };
        Some(format!("Port {port}: {name}"))
    } else {
        None
    }
}

/// Checks if a remote address falls in a reserved range and returns an
/// informational note.
///
/// Only fires when the address parses strictly (the permissive validator may
/// accept strings that are not real addresses); never blocks the add.
pub fn check_reserved_addr(value: &str) -> Option<String> {
    use std::net::IpAddr;

    let net: ipnetwork::IpNetwork = value.parse().ok()?;

    match net.ip() {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();

            // RFC 1918 private ranges
            if octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
            {
                return Some("Private range (RFC 1918) - reachable from LAN only".to_string());
            }

            if octets[0] == 127 {
                return Some("Loopback range (127.x) - forwards to this host".to_string());
            }

            if octets[0] == 169 && octets[1] == 254 {
                return Some("Link-local range (169.254.x.x) - APIPA addresses".to_string());
            }

            None
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() {
                return Some("IPv6 loopback (::1) - forwards to this host".to_string());
            }

            if ipv6.segments()[0] & 0xffc0 == 0xfe80 {
                return Some("IPv6 link-local (fe80::/10) - local network only".to_string());
            }

            None
        }
    }
}
