//! Address keys for the client prefix index
//!
//! An [`AddressKey`] is a masked address, its prefix length and the transport
//! the client is allowed to use. Keys are stored per prefix length, so the
//! prefix itself never takes part in ordering inside a bucket.

use crate::error::{ClientError, ClientResult};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Bit width of an IPv4 address
pub const IPV4_MAX_PREFIX: u8 = 32;

/// Bit width of an IPv6 address
pub const IPV6_MAX_PREFIX: u8 = 128;

/// Transport a client talks over
///
/// `Any` is the wildcard: a client registered with it answers requests
/// arriving over every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
    /// TLS over TCP (RadSec)
    Tls,
    Any,
}

impl Transport {
    /// Parse a `proto` configuration value
    ///
    /// Accepts `udp`, `tcp`, `tls`, `radsec` (same as `tls`), and `any` or
    /// `*` for the wildcard.
    pub fn from_proto(value: &str) -> Option<Self> {
        match value {
            "udp" => Some(Transport::Udp),
            "tcp" => Some(Transport::Tcp),
            "tls" | "radsec" => Some(Transport::Tls),
            "any" | "*" => Some(Transport::Any),
            _ => None,
        }
    }

    pub fn is_wildcard(self) -> bool {
        self == Transport::Any
    }

    /// Whether clients on this transport may hold stream connections
    pub fn is_stream(self) -> bool {
        self != Transport::Udp
    }

    /// Whether a client registered on `self` answers a request seen on `observed`
    ///
    /// A request whose transport is unknown to the caller (`Any`) is answered
    /// by whichever entry holds the address.
    pub fn accepts(self, observed: Transport) -> bool {
        self.is_wildcard() || observed.is_wildcard() || self == observed
    }

    /// Whether two entries at the same address occupy one storage slot
    ///
    /// Symmetric: a wildcard on either side claims the slot.
    pub fn shares_slot(self, other: Transport) -> bool {
        self.is_wildcard() || other.is_wildcard() || self == other
    }
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Udp
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
            Transport::Tls => "tls",
            Transport::Any => "*",
        };
        f.write_str(name)
    }
}

/// Bit width of the address family `addr` belongs to
pub fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => IPV4_MAX_PREFIX,
        IpAddr::V6(_) => IPV6_MAX_PREFIX,
    }
}

/// Clear every bit of `addr` past the first `prefix` bits
///
/// `prefix` is clamped to the family's width.
pub fn mask(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let prefix = prefix.min(IPV4_MAX_PREFIX);
            let bits = u32::from(v4);
            let masked = if prefix == 0 {
                0
            } else {
                bits & (u32::MAX << (IPV4_MAX_PREFIX - prefix))
            };
            IpAddr::V4(Ipv4Addr::from(masked))
        }
        IpAddr::V6(v6) => {
            let prefix = prefix.min(IPV6_MAX_PREFIX);
            let bits = u128::from(v6);
            let masked = if prefix == 0 {
                0
            } else {
                bits & (u128::MAX << (IPV6_MAX_PREFIX - prefix))
            };
            IpAddr::V6(Ipv6Addr::from(masked))
        }
    }
}

/// Normalized (family, masked address, prefix, transport) key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressKey {
    addr: IpAddr,
    prefix: u8,
    transport: Transport,
}

impl AddressKey {
    /// Create a key, masking `addr` down to `prefix` bits
    pub fn new(addr: IpAddr, prefix: u8, transport: Transport) -> ClientResult<Self> {
        let max = max_prefix(&addr);
        if prefix > max {
            return Err(ClientError::InvalidPrefixLength { addr, prefix, max });
        }

        Ok(AddressKey {
            addr: mask(addr, prefix),
            prefix,
            transport,
        })
    }

    /// Key covering exactly one host
    pub fn host(addr: IpAddr, transport: Transport) -> Self {
        AddressKey {
            addr,
            prefix: max_prefix(&addr),
            transport,
        }
    }

    /// Key for an already validated network
    pub fn from_network(network: IpNetwork, transport: Transport) -> Self {
        AddressKey {
            addr: network.network(),
            prefix: network.prefix(),
            transport,
        }
    }

    /// Key from raw address octets: 4 bytes for IPv4, 16 for IPv6
    pub fn from_octets(octets: &[u8], prefix: u8, transport: Transport) -> ClientResult<Self> {
        let addr = match octets.len() {
            4 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(octets);
                IpAddr::V4(Ipv4Addr::from(buf))
            }
            16 => {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(octets);
                IpAddr::V6(Ipv6Addr::from(buf))
            }
            len => {
                return Err(ClientError::InvalidAddressFamily(format!(
                    "{} address bytes is neither IPv4 nor IPv6",
                    len
                )))
            }
        };

        Self::new(addr, prefix, transport)
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// Bit width of this key's address family
    pub fn max_prefix(&self) -> u8 {
        max_prefix(&self.addr)
    }

    /// The key as a network (address and prefix only)
    pub fn network(&self) -> IpNetwork {
        // prefix was validated against the family when the key was built
        match IpNetwork::new(self.addr, self.prefix) {
            Ok(network) => network,
            Err(_) => IpNetwork::from(self.addr),
        }
    }

    /// Whether the address bits are all zero
    pub fn is_unspecified(&self) -> bool {
        self.addr.is_unspecified()
    }

    /// Rewrite an all-zero host key to the zero-length prefix
    ///
    /// `0.0.0.0/32` would only match a source address of all zeros, which is
    /// never what a configuration means. It becomes `0.0.0.0/0`.
    pub fn normalize_wildcard(self) -> Self {
        if self.is_unspecified() && self.prefix == self.max_prefix() {
            AddressKey { prefix: 0, ..self }
        } else {
            self
        }
    }

    /// Storage equality: same slot in a prefix bucket
    pub fn collides(&self, other: &AddressKey) -> bool {
        self.addr == other.addr
            && self.prefix == other.prefix
            && self.transport.shares_slot(other.transport)
    }

    /// Whether a request from `addr` over `transport` falls under this key
    pub fn matches(&self, addr: IpAddr, transport: Transport) -> bool {
        addr.is_ipv4() == self.addr.is_ipv4()
            && mask(addr, self.prefix) == self.addr
            && self.transport.accepts(transport)
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.addr, self.prefix, self.transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_mask_ipv4() {
        assert_eq!(mask(ip("10.1.2.3"), 8), ip("10.0.0.0"));
        assert_eq!(mask(ip("10.1.2.3"), 24), ip("10.1.2.0"));
        assert_eq!(mask(ip("10.1.2.3"), 32), ip("10.1.2.3"));
        assert_eq!(mask(ip("10.1.2.3"), 0), ip("0.0.0.0"));
        assert_eq!(mask(ip("192.168.255.255"), 17), ip("192.168.128.0"));
    }

    #[test]
    fn test_mask_ipv6() {
        assert_eq!(mask(ip("2001:db8::1"), 32), ip("2001:db8::"));
        assert_eq!(mask(ip("2001:db8::1"), 128), ip("2001:db8::1"));
        assert_eq!(mask(ip("2001:db8::1"), 0), ip("::"));
    }

    #[test]
    fn test_key_is_masked() {
        let key = AddressKey::new(ip("192.168.1.77"), 24, Transport::Udp).unwrap();
        assert_eq!(key.addr(), ip("192.168.1.0"));
        assert_eq!(key.prefix(), 24);
        assert_eq!(key.network(), "192.168.1.0/24".parse::<IpNetwork>().unwrap());
    }

    #[test]
    fn test_key_rejects_long_prefix() {
        let err = AddressKey::new(ip("10.0.0.1"), 33, Transport::Udp).unwrap_err();
        assert!(matches!(err, ClientError::InvalidPrefixLength { max: 32, .. }));

        assert!(AddressKey::new(ip("::1"), 128, Transport::Udp).is_ok());
        assert!(AddressKey::new(ip("::1"), 129, Transport::Udp).is_err());
    }

    #[test]
    fn test_key_from_octets() {
        let key = AddressKey::from_octets(&[10, 0, 0, 1], 32, Transport::Tcp).unwrap();
        assert_eq!(key.addr(), ip("10.0.0.1"));

        let key = AddressKey::from_octets(&[0u8; 16], 64, Transport::Tcp).unwrap();
        assert!(!key.is_ipv4());

        let err = AddressKey::from_octets(&[1, 2, 3], 24, Transport::Tcp).unwrap_err();
        assert!(matches!(err, ClientError::InvalidAddressFamily(_)));
    }

    #[test]
    fn test_normalize_wildcard() {
        let key = AddressKey::host(ip("0.0.0.0"), Transport::Udp).normalize_wildcard();
        assert_eq!(key.prefix(), 0);

        let key = AddressKey::host(ip("::"), Transport::Udp).normalize_wildcard();
        assert_eq!(key.prefix(), 0);

        // Only the full-width all-zero form is rewritten
        let key = AddressKey::new(ip("0.0.0.0"), 8, Transport::Udp)
            .unwrap()
            .normalize_wildcard();
        assert_eq!(key.prefix(), 8);

        let key = AddressKey::host(ip("10.0.0.1"), Transport::Udp).normalize_wildcard();
        assert_eq!(key.prefix(), 32);
    }

    #[test]
    fn test_transport_from_proto() {
        assert_eq!(Transport::from_proto("udp"), Some(Transport::Udp));
        assert_eq!(Transport::from_proto("tcp"), Some(Transport::Tcp));
        assert_eq!(Transport::from_proto("tls"), Some(Transport::Tls));
        assert_eq!(Transport::from_proto("radsec"), Some(Transport::Tls));
        assert_eq!(Transport::from_proto("any"), Some(Transport::Any));
        assert_eq!(Transport::from_proto("*"), Some(Transport::Any));
        assert_eq!(Transport::from_proto("sctp"), None);
    }

    #[test]
    fn test_collides_with_wildcard_transport() {
        let udp = AddressKey::host(ip("203.0.113.5"), Transport::Udp);
        let tcp = AddressKey::host(ip("203.0.113.5"), Transport::Tcp);
        let any = AddressKey::host(ip("203.0.113.5"), Transport::Any);

        assert!(!udp.collides(&tcp));
        assert!(udp.collides(&any));
        assert!(any.collides(&tcp));
        assert!(udp.collides(&udp));
    }

    #[test]
    fn test_collides_needs_same_prefix() {
        let a = AddressKey::new(ip("10.0.0.0"), 8, Transport::Udp).unwrap();
        let b = AddressKey::new(ip("10.0.0.0"), 16, Transport::Udp).unwrap();
        assert!(!a.collides(&b));
    }

    #[test]
    fn test_matches() {
        let net = AddressKey::new(ip("10.0.0.0"), 8, Transport::Udp).unwrap();
        assert!(net.matches(ip("10.1.2.3"), Transport::Udp));
        assert!(!net.matches(ip("11.1.2.3"), Transport::Udp));
        assert!(!net.matches(ip("10.1.2.3"), Transport::Tcp));
        assert!(!net.matches(ip("::a01:203"), Transport::Udp));

        let any = AddressKey::host(ip("203.0.113.5"), Transport::Any);
        assert!(any.matches(ip("203.0.113.5"), Transport::Udp));
        assert!(any.matches(ip("203.0.113.5"), Transport::Tcp));
        assert!(any.matches(ip("203.0.113.5"), Transport::Tls));
    }
}
