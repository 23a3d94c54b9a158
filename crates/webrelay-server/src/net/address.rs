use bytes::Bytes;
use std::fmt;
use std::net::Ipv4Addr;

/// Largest payload a single datagram read can carry
pub const MAX_DATAGRAM_SIZE: usize = 8 * 1024;

/// Four-byte address handed to the embedded engine.
///
/// Only the first octet routes: it is the session's slot index in the
/// address table. The other octets are filled at random when the slot is
/// reserved and are never consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualAddr([u8; 4]);

impl VirtualAddr {
    pub fn new(index: u8) -> Self {
        let mut octets: [u8; 4] = rand::random();
        octets[0] = index;
        Self(octets)
    }

    pub const fn from_octets(octets: [u8; 4]) -> Self {
        Self(octets)
    }

    pub const fn octets(&self) -> [u8; 4] {
        self.0
    }

    /// Slot index in the address table
    pub const fn index(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Display for VirtualAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ipv4Addr::from(self.0).fmt(f)
    }
}

impl From<VirtualAddr> for Ipv4Addr {
    fn from(addr: VirtualAddr) -> Self {
        Ipv4Addr::from(addr.0)
    }
}

impl From<Ipv4Addr> for VirtualAddr {
    fn from(ip: Ipv4Addr) -> Self {
        Self(ip.octets())
    }
}

/// One unreliable message exchanged between a session and the engine.
///
/// Inbound datagrams carry the sender's address; outbound ones carry the
/// destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub addr: VirtualAddr,
    pub payload: Bytes,
}

impl Datagram {
    pub fn new(addr: VirtualAddr, payload: impl Into<Bytes>) -> Self {
        Self {
            addr,
            payload: payload.into(),
        }
    }
}
