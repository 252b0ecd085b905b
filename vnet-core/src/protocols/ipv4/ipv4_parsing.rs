use super::{Ipv4Address, ProtocolNumber};
use crate::protocols::utility::{BytesExt, Checksum};
use std::fmt::{self, Debug, Formatter};
use thiserror::Error as ThisError;

/// The number of `u32` words in a basic IPv4 header
const BASE_WORDS: u8 = 5;
/// The number of `u8` bytes in a basic IPv4 header
pub const BASE_OCTETS: u16 = BASE_WORDS as u16 * 4;
/// This is bitwise anded with the `u16` containing flags and fragment offset to
/// extract the fragment offset part.
const FRAGMENT_OFFSET_MASK: u16 = 0x1fff;
/// The hop limit given to packets originating at this node
pub const DEFAULT_TTL: u8 = 16;

/// An IPv4 header, as described in RFC791 p11 s3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Header {
    /// Internet Header Length, the number of `u32` words in the IPv4 header
    pub ihl: u8,
    /// The quality of service desired
    pub type_of_service: u8,
    /// The length of the datagram in bytes
    pub total_length: u16,
    /// Assigned by the sender to aid in assembling fragments
    pub identification: u16,
    /// Where in the datagram this fragment belongs in units of 8 bytes
    pub fragment_offset: u16,
    /// Flags describing fragmentation properties
    pub flags: ControlFlags,
    /// The number of remaining hops this datagram can take before being removed
    pub time_to_live: u8,
    /// Indicates the next level protocol in the data portion of the datagram
    pub protocol: ProtocolNumber,
    /// The IPv4 header checksum
    pub checksum: u16,
    /// The source address
    pub source: Ipv4Address,
    /// The destination address
    pub destination: Ipv4Address,
}

impl Ipv4Header {
    /// Parses a header from a byte iterator. The checksum over the whole
    /// header, including the checksum field, must come out to zero.
    pub fn from_bytes(mut bytes: impl Iterator<Item = u8>) -> Result<Self, ParseError> {
        let mut checksum = Checksum::new();

        let version_and_ihl = bytes.next_u8().ok_or(ParseError::HeaderTooShort)?;
        let version = version_and_ihl >> 4;
        if version != 4 {
            Err(ParseError::IncorrectIpv4Version)?
        }
        let ihl = version_and_ihl & 0b1111;
        if ihl != BASE_WORDS {
            Err(ParseError::InvalidHeaderLength)?
        }
        let type_of_service = bytes.next_u8().ok_or(ParseError::HeaderTooShort)?;
        checksum.add_u8(version_and_ihl, type_of_service);

        let mut next_u16 = || -> Result<u16, ParseError> {
            bytes.next_u16_be().ok_or(ParseError::HeaderTooShort)
        };

        let total_length = next_u16()?;
        let identification = next_u16()?;
        let flags_and_fragment_offset = next_u16()?;
        let [time_to_live, protocol] = next_u16()?.to_be_bytes();
        let expected_checksum = next_u16()?;
        let source = [next_u16()?, next_u16()?];
        let destination = [next_u16()?, next_u16()?];

        for word in [total_length, identification, flags_and_fragment_offset]
            .into_iter()
            .chain(source)
            .chain(destination)
        {
            checksum.add_u16(word);
        }
        checksum.add_u8(time_to_live, protocol);

        let actual_checksum = checksum.as_u16();
        checksum.add_u16(expected_checksum);
        if checksum.as_u16() != 0 {
            Err(ParseError::Checksum {
                expected: expected_checksum,
                actual: actual_checksum,
            })?
        }

        if total_length < BASE_OCTETS {
            Err(ParseError::LengthMismatch)?
        }

        let join = |words: [u16; 2]| -> Ipv4Address {
            (((words[0] as u32) << 16) | words[1] as u32).into()
        };

        Ok(Self {
            ihl,
            type_of_service,
            total_length,
            identification,
            fragment_offset: flags_and_fragment_offset & FRAGMENT_OFFSET_MASK,
            flags: ((flags_and_fragment_offset >> 13) as u8).into(),
            time_to_live,
            protocol: protocol.into(),
            checksum: expected_checksum,
            source: join(source),
            destination: join(destination),
        })
    }

    /// The length of the payload that follows the header
    pub fn payload_length(&self) -> u16 {
        self.total_length.saturating_sub(self.ihl as u16 * 4)
    }

    /// Serializes the header, recomputing the checksum from the current
    /// field values. Forwarding relies on this after decrementing the TTL.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BASE_OCTETS as usize);
        out.push((4u8 << 4) | self.ihl);
        out.push(self.type_of_service);
        out.extend_from_slice(&self.total_length.to_be_bytes());
        out.extend_from_slice(&self.identification.to_be_bytes());
        let flags_and_fragment_offset =
            ((self.flags.as_u8() as u16) << 13) | (self.fragment_offset & FRAGMENT_OFFSET_MASK);
        out.extend_from_slice(&flags_and_fragment_offset.to_be_bytes());
        out.push(self.time_to_live);
        out.push(self.protocol.into());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.source.to_bytes());
        out.extend_from_slice(&self.destination.to_bytes());
        let checksum = Checksum::of(&out);
        out[10..12].copy_from_slice(&checksum.to_be_bytes());
        out
    }

    /// Recomputes the stored checksum field.
    pub fn refresh_checksum(&mut self) {
        let serial = self.serialize();
        self.checksum = u16::from_be_bytes([serial[10], serial[11]]);
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("The IPv4 header is incomplete")]
    HeaderTooShort,
    #[error("Expected version 4 in IPv4 header")]
    IncorrectIpv4Version,
    #[error("Expected 5 words for IPv4 header")]
    InvalidHeaderLength,
    #[error("The total length disagrees with the bytes received")]
    LengthMismatch,
    #[error(
        "The header checksum {expected:#06x} does not match the calculated checksum {actual:#06x}"
    )]
    Checksum { expected: u16, actual: u16 },
}

/// A builder for IPv4 headers. The fields align with those found on [`Ipv4Header`].
pub struct Ipv4HeaderBuilder {
    type_of_service: u8,
    payload_length: usize,
    identification: u16,
    flags: ControlFlags,
    time_to_live: u8,
    protocol: ProtocolNumber,
    source: Ipv4Address,
    destination: Ipv4Address,
}

impl Ipv4HeaderBuilder {
    /// Creates a new builder.
    pub fn new(
        source: Ipv4Address,
        destination: Ipv4Address,
        protocol: ProtocolNumber,
        payload_length: usize,
    ) -> Self {
        Self {
            type_of_service: 0,
            payload_length,
            identification: 0,
            flags: Default::default(),
            time_to_live: DEFAULT_TTL,
            protocol,
            source,
            destination,
        }
    }

    /// Creates a header with a valid checksum from the configuration provided
    pub fn build(self) -> Result<Ipv4Header, HeaderBuildError> {
        let total_length = u16::try_from(self.payload_length)
            .ok()
            .and_then(|length| length.checked_add(BASE_OCTETS))
            .ok_or(HeaderBuildError::OverlyLongPayload)?;
        let mut header = Ipv4Header {
            ihl: BASE_WORDS,
            type_of_service: self.type_of_service,
            total_length,
            identification: self.identification,
            fragment_offset: 0,
            flags: self.flags,
            time_to_live: self.time_to_live,
            protocol: self.protocol,
            checksum: 0,
            source: self.source,
            destination: self.destination,
        };
        header.refresh_checksum();
        Ok(header)
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum HeaderBuildError {
    #[error("The payload is longer than is allowed")]
    OverlyLongPayload,
}

/// A complete datagram: a header followed by an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ipv4Packet {
    pub header: Ipv4Header,
    pub payload: Vec<u8>,
}

impl Ipv4Packet {
    /// Builds a packet with default header fields around `payload`.
    pub fn new(
        source: Ipv4Address,
        destination: Ipv4Address,
        protocol: ProtocolNumber,
        payload: Vec<u8>,
    ) -> Result<Self, HeaderBuildError> {
        let header =
            Ipv4HeaderBuilder::new(source, destination, protocol, payload.len()).build()?;
        Ok(Self { header, payload })
    }

    /// Serializes the header and payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.header.serialize();
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses a packet out of a received frame. Bytes past the header's
    /// total length are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        let header = Ipv4Header::from_bytes(bytes.iter().cloned())?;
        let end = header.total_length as usize;
        if end > bytes.len() {
            Err(ParseError::LengthMismatch)?
        }
        let start = header.ihl as usize * 4;
        Ok(Self {
            header,
            payload: bytes[start..end].to_vec(),
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlFlags(u8);

impl ControlFlags {
    /// Don't fragment, last fragment
    pub const DEFAULT: Self = Self::new(false, true);

    pub const fn new(may_fragment: bool, is_last_fragment: bool) -> Self {
        Self((!is_last_fragment as u8) | ((!may_fragment as u8) << 1))
    }

    pub const fn may_fragment(&self) -> bool {
        self.0 & 0b10 == 0
    }

    pub const fn is_last_fragment(&self) -> bool {
        self.0 & 0b01 == 0
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl Debug for ControlFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlFlags")
            .field("MayFrag", &self.may_fragment())
            .field("LastFrag", &self.is_last_fragment())
            .finish()
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u8> for ControlFlags {
    fn from(byte: u8) -> Self {
        Self(byte & 0b11)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: Ipv4Address = Ipv4Address::new([10, 0, 0, 1]);
    const DESTINATION: Ipv4Address = Ipv4Address::new([10, 0, 0, 2]);
    const PAYLOAD: &[u8] = b"Hello, world!";

    fn make_header() -> (etherparse::Ipv4Header, Vec<u8>) {
        let mut header = etherparse::Ipv4Header::new(
            PAYLOAD.len().try_into().unwrap(),
            DEFAULT_TTL,
            etherparse::IpNumber::Tcp,
            SOURCE.to_bytes(),
            DESTINATION.to_bytes(),
        );
        header.dont_fragment = true;
        header.header_checksum = header.calc_header_checksum().unwrap();
        let mut serial = vec![];
        header.write(&mut serial).unwrap();
        (header, serial)
    }

    #[test]
    fn parses_basic_header() -> anyhow::Result<()> {
        let (valid_header, serial_header) = make_header();
        let parsed = Ipv4Header::from_bytes(serial_header.iter().cloned())?;
        assert_eq!(parsed.ihl, valid_header.ihl());
        assert_eq!(parsed.total_length, valid_header.total_len());
        assert_eq!(parsed.identification, valid_header.identification);
        assert!(!parsed.flags.may_fragment());
        assert!(parsed.flags.is_last_fragment());
        assert_eq!(parsed.fragment_offset, 0);
        assert_eq!(parsed.time_to_live, valid_header.time_to_live);
        assert_eq!(parsed.protocol, ProtocolNumber::Tcp);
        assert_eq!(parsed.checksum, valid_header.header_checksum);
        assert_eq!(parsed.source.to_bytes(), valid_header.source);
        assert_eq!(parsed.destination.to_bytes(), valid_header.destination);
        Ok(())
    }

    #[test]
    fn generates_basic_header() -> anyhow::Result<()> {
        let (_, expected) = make_header();
        let actual = Ipv4HeaderBuilder::new(SOURCE, DESTINATION, ProtocolNumber::Tcp, PAYLOAD.len())
            .build()?
            .serialize();
        assert_eq!(actual, expected);
        assert_eq!(Checksum::of(&actual), 0);
        Ok(())
    }

    #[test]
    fn packet_survives_encoding() -> anyhow::Result<()> {
        let packet = Ipv4Packet::new(SOURCE, DESTINATION, ProtocolNumber::Rip, PAYLOAD.to_vec())?;
        let mut frame = packet.encode();
        // Link frames may carry padding past the datagram
        frame.extend_from_slice(&[0; 7]);
        assert_eq!(Ipv4Packet::decode(&frame)?, packet);
        Ok(())
    }

    #[test]
    fn rejects_corrupted_header() -> anyhow::Result<()> {
        let packet = Ipv4Packet::new(SOURCE, DESTINATION, ProtocolNumber::Test, PAYLOAD.to_vec())?;
        let mut frame = packet.encode();
        frame[8] -= 1;
        assert!(matches!(
            Ipv4Packet::decode(&frame),
            Err(ParseError::Checksum { .. })
        ));
        Ok(())
    }

    #[test]
    fn rejects_truncated_payload() -> anyhow::Result<()> {
        let packet = Ipv4Packet::new(SOURCE, DESTINATION, ProtocolNumber::Test, PAYLOAD.to_vec())?;
        let frame = packet.encode();
        assert_eq!(
            Ipv4Packet::decode(&frame[..frame.len() - 1]),
            Err(ParseError::LengthMismatch)
        );
        assert_eq!(
            Ipv4Packet::decode(&frame[..12]),
            Err(ParseError::HeaderTooShort)
        );
        Ok(())
    }

    #[test]
    fn ttl_change_keeps_header_valid() -> anyhow::Result<()> {
        let mut packet =
            Ipv4Packet::new(SOURCE, DESTINATION, ProtocolNumber::Test, PAYLOAD.to_vec())?;
        packet.header.time_to_live -= 1;
        packet.header.refresh_checksum();
        let decoded = Ipv4Packet::decode(&packet.encode())?;
        assert_eq!(decoded.header.time_to_live, DEFAULT_TTL - 1);
        Ok(())
    }
}
