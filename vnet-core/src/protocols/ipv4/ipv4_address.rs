use std::{
    fmt::{self, Display},
    str::FromStr,
};
use thiserror::Error as ThisError;

/// A virtual IP address. Virtual addresses are independent of the physical
/// addresses of the hosts that carry the links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ipv4Address([u8; 4]);

impl Ipv4Address {
    /// The address `0.0.0.0`.
    pub const CURRENT_NETWORK: Self = Self([0u8, 0, 0, 0]);

    /// The address `127.0.0.1`.
    pub const LOCALHOST: Self = Self([127u8, 0, 0, 1]);

    /// The address `255.255.255.255`.
    pub const SUBNET: Self = Self([255u8, 255, 255, 255]);

    /// Creates a new address. The number can be provided as a `[u8; 4]` or a
    /// `u32`.
    pub const fn new(address: [u8; 4]) -> Self {
        Self(address)
    }

    /// Gets the address as a `u32`.
    pub fn to_u32(self) -> u32 {
        self.into()
    }

    /// Gets the address as a `[u8; 4]`.
    pub fn to_bytes(self) -> [u8; 4] {
        self.into()
    }
}

impl Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        write!(f, "{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

impl FromStr for Ipv4Address {
    type Err = AddressParseError;

    /// Parses dotted-decimal notation, e.g. `10.0.0.1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 4];
        let mut parts = s.trim().split('.');
        for byte in out.iter_mut() {
            let part = parts.next().ok_or(AddressParseError::TooFewOctets)?;
            *byte = part
                .parse()
                .map_err(|_| AddressParseError::InvalidOctet)?;
        }
        if parts.next().is_some() {
            Err(AddressParseError::TooManyOctets)?
        }
        Ok(Self(out))
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("An address needs four octets")]
    TooFewOctets,
    #[error("An address has only four octets")]
    TooManyOctets,
    #[error("Each octet must be a number from 0 to 255")]
    InvalidOctet,
}

impl From<u32> for Ipv4Address {
    fn from(n: u32) -> Self {
        Self::from(n.to_be_bytes())
    }
}

impl From<[u8; 4]> for Ipv4Address {
    fn from(n: [u8; 4]) -> Self {
        Self(n)
    }
}

impl From<Ipv4Address> for u32 {
    fn from(address: Ipv4Address) -> Self {
        u32::from_be_bytes(address.0)
    }
}

impl From<Ipv4Address> for [u8; 4] {
    fn from(address: Ipv4Address) -> Self {
        address.0
    }
}
