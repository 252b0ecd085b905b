//! Contains utilities for implementing protocols.

use super::ipv4::Ipv4Address;
use std::fmt::{self, Display};

/// A calculator for the one's complement checksum used by the IP and TCP
/// headers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum(u16);

impl Checksum {
    /// Creates a new checksum calculator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `u16` to the checksum value, folding the carry back in.
    pub fn add_u16(&mut self, value: u16) {
        let (sum, carry) = self.0.overflowing_add(value);
        self.0 = sum + carry as u16;
    }

    /// Adds `u16` formed by two `u8`s to the checksum value.
    pub fn add_u8(&mut self, a: u8, b: u8) {
        self.add_u16(u16::from_be_bytes([a, b]));
    }

    /// Adds two `u16`s to the checksum value by splitting a `u32` in half.
    pub fn add_u32(&mut self, value: [u8; 4]) {
        self.add_u8(value[0], value[1]);
        self.add_u8(value[2], value[3]);
    }

    /// Repeatedly gets the next two bytes at a `u16` from a byte iterator. If the `payload`
    /// contains an odd number of bytes, the last `u8` will be appended with the
    /// value zero.
    pub fn accumulate_remainder(&mut self, mut payload: impl Iterator<Item = u8>) {
        while let Some(a) = payload.next() {
            self.add_u8(a, payload.next().unwrap_or(0));
        }
    }

    /// Computes the final checksum value.
    pub fn as_u16(&self) -> u16 {
        !self.0
    }

    /// The checksum of a whole buffer, including its embedded checksum
    /// field. A correctly built header sums to zero.
    pub fn of(bytes: &[u8]) -> u16 {
        let mut checksum = Self::new();
        checksum.accumulate_remainder(bytes.iter().cloned());
        checksum.as_u16()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Endpoint {
    pub address: Ipv4Address,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(address: Ipv4Address, port: u16) -> Self {
        Self { address, port }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// The four values that identify a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Endpoints {
    pub local: Endpoint,
    pub remote: Endpoint,
}

impl Endpoints {
    pub const fn new(local: Endpoint, remote: Endpoint) -> Self {
        Self { local, remote }
    }

    /// The key a listening socket is registered under: only the local port
    /// is significant.
    pub const fn wildcard(port: u16) -> Self {
        Self {
            local: Endpoint::new(Ipv4Address::CURRENT_NETWORK, port),
            remote: Endpoint::new(Ipv4Address::CURRENT_NETWORK, 0),
        }
    }

    pub const fn reverse(self) -> Self {
        Self {
            local: self.remote,
            remote: self.local,
        }
    }
}

impl Display for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.local, self.remote)
    }
}

/// An extension trait for Iterator<Item = u8>. This should make it easier to parse bytes.
///
/// # Example
///
/// ```
/// # use vnet_core::protocols::utility::BytesExt;
/// let arr = [0xFF, 0x01, 0x09, 0x69];
/// let mut iter = arr.iter().cloned();
/// assert_eq!(iter.next_u16_be(), Some(0xFF01));
/// assert_eq!(iter.next_u8(), Some(0x09));
/// assert_eq!(iter.next_u32_be(), None);
/// ```
pub trait BytesExt: Iterator<Item = u8> {
    /// Advances the iterator and returns the next value.
    fn next_u8(&mut self) -> Option<u8> {
        self.next()
    }

    /// Combines the next 2 bytes in big-endian order into a u16.
    fn next_u16_be(&mut self) -> Option<u16> {
        let arr = [self.next()?, self.next()?];
        Some(u16::from_be_bytes(arr))
    }

    /// Combines the next 4 bytes in big-endian order into a u32.
    fn next_u32_be(&mut self) -> Option<u32> {
        let arr = [self.next()?, self.next()?, self.next()?, self.next()?];
        Some(u32::from_be_bytes(arr))
    }

    /// Reads the next 4 bytes as an [`Ipv4Address`].
    fn next_ipv4addr(&mut self) -> Option<Ipv4Address> {
        self.next_u32_be().map(Ipv4Address::from)
    }
}

impl<T: Iterator<Item = u8>> BytesExt for T {}
