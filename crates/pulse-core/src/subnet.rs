//! CIDR allow-list check for the client-supplied source address.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A single CIDR block, e.g. `10.0.0.0/8` or `fd00::/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedSubnet {
    network: IpAddr,
    prefix: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid CIDR {0:?}")]
pub struct InvalidCidr(pub String);

impl TrustedSubnet {
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            (IpAddr::V4(_), IpAddr::V6(ip)) => match ip.to_ipv4_mapped() {
                Some(v4) => self.contains(IpAddr::V4(v4)),
                None => false,
            },
            (IpAddr::V6(_), IpAddr::V4(_)) => false,
        }
    }

    /// Parse an address string and test it; unparsable input is outside.
    pub fn contains_str(&self, addr: &str) -> bool {
        addr.trim()
            .parse::<IpAddr>()
            .map(|ip| self.contains(ip))
            .unwrap_or(false)
    }
}

fn mask_u32(prefix: u8) -> u32 {
    if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) }
}

fn mask_u128(prefix: u8) -> u128 {
    if prefix == 0 { 0 } else { u128::MAX << (128 - u32::from(prefix)) }
}

impl FromStr for TrustedSubnet {
    type Err = InvalidCidr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidCidr(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_membership() {
        let subnet: TrustedSubnet = "192.168.1.0/24".parse().unwrap();
        assert!(subnet.contains_str("192.168.1.17"));
        assert!(!subnet.contains_str("192.168.2.17"));
        assert!(!subnet.contains_str("not-an-ip"));
        assert!(subnet.contains_str("::ffff:192.168.1.5"));
    }

    #[test]
    fn zero_prefix_matches_everything_in_family() {
        let subnet: TrustedSubnet = "0.0.0.0/0".parse().unwrap();
        assert!(subnet.contains_str("8.8.8.8"));
        assert!(!subnet.contains_str("fe80::1"));
    }

    #[test]
    fn v6_membership() {
        let subnet: TrustedSubnet = "fd00::/8".parse().unwrap();
        assert!(subnet.contains_str("fd12:3456::1"));
        assert!(!subnet.contains_str("fe80::1"));
    }

    #[test]
    fn rejects_bad_cidr() {
        assert!("10.0.0.0".parse::<TrustedSubnet>().is_err());
        assert!("10.0.0.0/33".parse::<TrustedSubnet>().is_err());
        assert!("nope/8".parse::<TrustedSubnet>().is_err());
        assert_eq!(
            "10.0.0.0/8".parse::<TrustedSubnet>().unwrap().to_string(),
            "10.0.0.0/8"
        );
    }
}
