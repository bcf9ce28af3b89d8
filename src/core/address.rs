//! Source address canonicalization for admission and rate-limit keys
//!
//! A single IPv6 address has many textual representations, so every address
//! is reduced to its fully expanded, zero-padded 8-group form before being
//! used as a map key or compared against a range ban.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::{GatewardError, Result};

/// A normalized network address used as the admission and rate-limit key.
///
/// Wraps `IpAddr`, whose structural equality already collapses the textual
/// variants of an IPv6 address into one key. The canonical string form and
/// the range keys are derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceAddress(IpAddr);

impl SourceAddress {
    pub fn new(ip: IpAddr) -> Self {
        Self(ip)
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }

    /// Canonical textual form: dotted quad for IPv4, expanded zero-padded
    /// 8-group form for IPv6 ("2001:db8::1" -> "2001:0db8:...:0001").
    pub fn canonical(&self) -> String {
        match self.0 {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => expand_ipv6(v6),
        }
    }

    /// Range key covering this address: first 3 octets for IPv4 (/24),
    /// first 4 groups of the expanded form for IPv6 (/64).
    pub fn range_key(&self) -> String {
        match self.0 {
            IpAddr::V4(v4) => prefix_octets(v4, 3),
            IpAddr::V6(v6) => prefix_groups(v6, 4),
        }
    }

    /// Wide range key: first 2 octets for IPv4 (/16), first 3 groups for
    /// IPv6 (/48).
    pub fn wide_range_key(&self) -> String {
        match self.0 {
            IpAddr::V4(v4) => prefix_octets(v4, 2),
            IpAddr::V6(v6) => prefix_groups(v6, 3),
        }
    }

    /// IPv6 range key with an arbitrary group prefix (1..=8 groups), for
    /// stores configured with a non-default prefix length. Returns `None`
    /// for IPv4 addresses and out-of-range prefixes.
    pub fn group_prefix(&self, groups: usize) -> Option<String> {
        match self.0 {
            IpAddr::V6(v6) if (1..=8).contains(&groups) => Some(prefix_groups(v6, groups)),
            _ => None,
        }
    }

    /// Partially masked form for log output, so full addresses are not
    /// spilled at info level.
    pub fn masked(&self) -> String {
        match self.0 {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                format!("{}.{}.{}.x", o[0], o[1], o[2])
            }
            IpAddr::V6(v6) => format!("{}:x:x:x:x", prefix_groups(v6, 4)),
        }
    }
}

impl From<IpAddr> for SourceAddress {
    fn from(ip: IpAddr) -> Self {
        Self(ip)
    }
}

impl FromStr for SourceAddress {
    type Err = GatewardError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<IpAddr>()
            .map(Self)
            .map_err(|e| GatewardError::ConfigError(format!("Invalid address '{}': {}", s, e)))
    }
}

impl fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

fn expand_ipv6(v6: Ipv6Addr) -> String {
    let segments = v6.segments();
    segments
        .iter()
        .map(|s| format!("{:04x}", s))
        .collect::<Vec<_>>()
        .join(":")
}

fn prefix_groups(v6: Ipv6Addr, groups: usize) -> String {
    v6.segments()[..groups]
        .iter()
        .map(|s| format!("{:04x}", s))
        .collect::<Vec<_>>()
        .join(":")
}

fn prefix_octets(v4: Ipv4Addr, octets: usize) -> String {
    v4.octets()[..octets]
        .iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv6_textual_variants_share_a_key() {
        let short: SourceAddress = "2001:db8::1".parse().unwrap();
        let long: SourceAddress = "2001:0db8:0000:0000:0000:0000:0000:0001".parse().unwrap();

        assert_eq!(short, long);
        assert_eq!(short.canonical(), long.canonical());
        assert_eq!(
            short.canonical(),
            "2001:0db8:0000:0000:0000:0000:0000:0001"
        );
    }

    #[test]
    fn test_ipv6_range_keys() {
        let addr: SourceAddress = "2001:db8::dead:beef".parse().unwrap();
        assert_eq!(addr.range_key(), "2001:0db8:0000:0000");
        assert_eq!(addr.wide_range_key(), "2001:0db8:0000");
        assert_eq!(addr.group_prefix(2), Some("2001:0db8".to_string()));
        assert_eq!(addr.group_prefix(9), None);
    }

    #[test]
    fn test_ipv4_range_keys() {
        let addr: SourceAddress = "203.0.113.7".parse().unwrap();
        assert_eq!(addr.canonical(), "203.0.113.7");
        assert_eq!(addr.range_key(), "203.0.113");
        assert_eq!(addr.wide_range_key(), "203.0");
        assert_eq!(addr.group_prefix(4), None);
    }

    #[test]
    fn test_masked_forms() {
        let v4: SourceAddress = "203.0.113.7".parse().unwrap();
        assert_eq!(v4.masked(), "203.0.113.x");

        let v6: SourceAddress = "2001:db8::1".parse().unwrap();
        assert_eq!(v6.masked(), "2001:0db8:0000:0000:x:x:x:x");
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        assert!("not-an-address".parse::<SourceAddress>().is_err());
    }
}
