// topoprobe: Active IPv4 network topology discovery
// Copyright (C) 2026 the topoprobe contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! IPv4 address and CIDR arithmetic primitives.
//!
//! Every core module (`dict`, `subnet`, `graph`) depends on this directly,
//! so it lives in the crate rather than behind a trait boundary.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;

/// A 32-bit IPv4 address with plain numeric ordering of the 32-bit
/// representation, which the inference and graph algorithms rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Ipv4(pub u32);

impl Ipv4 {
    pub const ZERO: Ipv4 = Ipv4(0);

    pub fn from_octets(a: u8, b: u8, c: u8, d: u8) -> Self {
        Ipv4(u32::from_be_bytes([a, b, c, d]))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Unsigned 32-bit difference `self - other`, matching the spec's
    /// "(ip_cur - ip_prev)" flickering-delta computation.
    pub fn wrapping_sub(&self, other: Ipv4) -> u32 {
        self.0.wrapping_sub(other.0)
    }

    /// Smallest CIDR block of the given prefix length that contains this IP.
    pub fn network(&self, prefix_len: u8) -> Cidr {
        Cidr::new(*self, prefix_len).network()
    }

    pub fn to_std(self) -> Ipv4Addr {
        Ipv4Addr::from(self.0)
    }
}

impl From<Ipv4Addr> for Ipv4 {
    fn from(a: Ipv4Addr) -> Self {
        Ipv4(u32::from(a))
    }
}

impl From<Ipv4> for Ipv4Addr {
    fn from(ip: Ipv4) -> Self {
        Ipv4Addr::from(ip.0)
    }
}

impl FromStr for Ipv4 {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Ipv4Addr::from_str(s)?.into())
    }
}

impl fmt::Display for Ipv4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Ipv4Addr::from(*self))
    }
}

/// A CIDR block: a base IP (not necessarily the network's lower border until
/// `.network()` is called) plus a prefix length in `[0, 32]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    addr: Ipv4,
    prefix_len: u8,
}

impl Cidr {
    pub fn new(addr: Ipv4, prefix_len: u8) -> Self {
        assert!(prefix_len <= 32, "prefix length out of range: {prefix_len}");
        Cidr { addr, prefix_len }
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    fn mask(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix_len)
        }
    }

    /// Lower border (network address) of this block.
    pub fn lower(&self) -> Ipv4 {
        Ipv4(self.addr.0 & self.mask())
    }

    /// Upper border (broadcast address) of this block.
    pub fn upper(&self) -> Ipv4 {
        Ipv4(self.addr.0 | !self.mask())
    }

    /// Normalize so `addr` is exactly the network's lower border.
    pub fn network(&self) -> Cidr {
        Cidr {
            addr: self.lower(),
            prefix_len: self.prefix_len,
        }
    }

    pub fn contains(&self, ip: Ipv4) -> bool {
        ip >= self.lower() && ip <= self.upper()
    }

    /// Whether this block fully contains `other`.
    pub fn encompasses(&self, other: &Cidr) -> bool {
        self.prefix_len <= other.prefix_len
            && self.lower() <= other.lower()
            && self.upper() >= other.upper()
    }

    /// Top 20 bits of the lower border, used as `Graph`'s subnet-index
    /// bucket key.
    pub fn index_bucket(&self) -> u32 {
        self.lower().0 >> 12
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.lower(), self.prefix_len)
    }
}

impl FromStr for Cidr {
    type Err = ipnet::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net = Ipv4Net::from_str(s)?;
        Ok(Cidr::new(net.addr().into(), net.prefix_len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_borders() {
        let c = Cidr::new(Ipv4::from_octets(10, 0, 0, 5), 30);
        assert_eq!(c.lower(), Ipv4::from_octets(10, 0, 0, 4));
        assert_eq!(c.upper(), Ipv4::from_octets(10, 0, 0, 7));
        assert!(c.contains(Ipv4::from_octets(10, 0, 0, 6)));
        assert!(!c.contains(Ipv4::from_octets(10, 0, 0, 8)));
    }

    #[test]
    fn encompasses() {
        let outer = Cidr::new(Ipv4::from_octets(10, 0, 0, 0), 24);
        let inner = Cidr::new(Ipv4::from_octets(10, 0, 0, 5), 30);
        assert!(outer.encompasses(&inner));
        assert!(!inner.encompasses(&outer));
    }

    #[test]
    fn index_bucket_top_20_bits() {
        let a = Cidr::new(Ipv4::from_octets(10, 0, 0, 1), 24);
        let b = Cidr::new(Ipv4::from_octets(10, 0, 0, 200), 24);
        assert_eq!(a.index_bucket(), b.index_bucket());
    }

    #[test]
    fn ordering_is_numeric() {
        assert!(Ipv4::from_octets(10, 0, 0, 1) < Ipv4::from_octets(10, 0, 0, 2));
        assert!(Ipv4::from_octets(9, 255, 255, 255) < Ipv4::from_octets(10, 0, 0, 0));
    }
}
