use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Which address ranges count as "private" when deciding whether a request may leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AddressScope {
    /// `127.0.0.1`, `10.0.0.0/8`, `172.16.0.0/12` and `192.168.0.0/16` only.
    Rfc1918,
    /// RFC 1918 plus the rest of loopback, link-local, unspecified, CGNAT and the
    /// IPv6 equivalents.
    #[default]
    Extended,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DestinationClassifier {
    scope: AddressScope,
}

impl DestinationClassifier {
    pub fn new(scope: AddressScope) -> Self {
        Self { scope }
    }

    /// Classifies an IP literal. Anything that does not parse as an address is
    /// reported as non-private.
    pub fn is_private_address(&self, ip_literal: &str) -> bool {
        parse_ip_literal(ip_literal)
            .map(|ip| self.is_private_ip(ip))
            .unwrap_or(false)
    }

    pub fn is_private_ip(&self, ip: IpAddr) -> bool {
        match (ip, self.scope) {
            (IpAddr::V4(v4), AddressScope::Rfc1918) => is_rfc1918_v4(v4),
            (IpAddr::V4(v4), AddressScope::Extended) => is_extended_v4(v4),
            // RFC 1918 scope has no IPv6 ranges at all.
            (IpAddr::V6(_), AddressScope::Rfc1918) => false,
            (IpAddr::V6(v6), AddressScope::Extended) => is_extended_v6(v6),
        }
    }
}

pub(crate) fn parse_ip_literal(literal: &str) -> Option<IpAddr> {
    let trimmed = literal
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');
    trimmed.parse::<IpAddr>().ok()
}

fn is_rfc1918_v4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    ip == Ipv4Addr::LOCALHOST
        || a == 10
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
}

fn is_extended_v4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    is_rfc1918_v4(ip)
        || ip.is_loopback()
        || ip.is_link_local()
        || a == 0
        || (a == 100 && (64..=127).contains(&b))
}

fn is_extended_v6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_extended_v4(mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}
