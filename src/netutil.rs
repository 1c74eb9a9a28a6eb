/*!
IPv4 utilities for ipwatch.

This module centralizes:
- IPv4 parsing (strict, canonical dotted quad)
- CIDR range parsing and membership
- The address policy deciding which sightings count as "public"

The policy is data, not code: the default list mirrors what the page
extractor has always excluded (RFC1918, loopback, "this network",
link-local, the first multicast and the first reserved /8), and callers may
replace it from configuration.
*/

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::errors::{IpWatchError, Result};

/// Ranges excluded from sightings unless configuration overrides them.
pub const DEFAULT_EXCLUDED_RANGES: [&str; 8] = [
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "127.0.0.0/8",
    "0.0.0.0/8",
    "169.254.0.0/16",
    "224.0.0.0/8",
    "240.0.0.0/8",
];

/// Parse a numeric IPv4 address string into Ipv4Addr.
pub fn parse_ipv4(s: &str) -> Result<Ipv4Addr> {
    Ipv4Addr::from_str(s.trim()).map_err(|_| IpWatchError::invalid_ip(s))
}

/// Build an address from four decimal octet tokens, tolerating leading zeros
/// ("010" -> 10). Returns None if any token is not a valid octet.
pub fn ipv4_from_octets<'a, I>(tokens: I) -> Option<Ipv4Addr>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut octets = [0u8; 4];
    let mut count = 0;
    for token in tokens {
        if count == 4 || token.is_empty() || token.len() > 3 {
            return None;
        }
        octets[count] = token.parse().ok()?;
        count += 1;
    }
    (count == 4).then(|| Ipv4Addr::from(octets))
}

/// An IPv4 CIDR block such as `172.16.0.0/12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Range {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Range {
    pub fn new(network: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(IpWatchError::invalid_range(
                format!("{network}/{prefix}"),
                "prefix length must be at most 32",
            ));
        }
        // Normalize host bits away so equality and Display are canonical.
        let network = Ipv4Addr::from(u32::from(network) & mask(prefix));
        Ok(Self { network, prefix })
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & mask(self.prefix) == u32::from(self.network)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl FromStr for Ipv4Range {
    type Err = IpWatchError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let prefix = prefix
                    .parse::<u8>()
                    .map_err(|_| IpWatchError::invalid_range(s, "prefix is not a number"))?;
                (addr, prefix)
            }
            None => (s, 32),
        };
        let network = Ipv4Addr::from_str(addr)
            .map_err(|_| IpWatchError::invalid_range(s, "network is not an IPv4 address"))?;
        Self::new(network, prefix)
    }
}

impl fmt::Display for Ipv4Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Decides which addresses are worth recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPolicy {
    excluded: Vec<Ipv4Range>,
}

impl AddressPolicy {
    /// Build a policy from CIDR strings.
    pub fn from_cidrs<S: AsRef<str>>(ranges: &[S]) -> Result<Self> {
        let excluded = ranges
            .iter()
            .map(|r| r.as_ref().parse())
            .collect::<Result<Vec<Ipv4Range>>>()?;
        Ok(Self { excluded })
    }

    /// A policy that accepts every address.
    pub fn permissive() -> Self {
        Self { excluded: vec![] }
    }

    pub fn is_public(&self, ip: Ipv4Addr) -> bool {
        !self.excluded.iter().any(|r| r.contains(ip))
    }

    pub fn excluded_ranges(&self) -> &[Ipv4Range] {
        &self.excluded
    }
}

impl Default for AddressPolicy {
    fn default() -> Self {
        let excluded = DEFAULT_EXCLUDED_RANGES
            .iter()
            .filter_map(|r| r.parse().ok())
            .collect();
        Self { excluded }
    }
}
