use crate::protocols::{
    ipv4::{Ipv4Address, ProtocolNumber},
    utility::{BytesExt, Checksum},
};
use std::fmt::{self, Debug, Display, Formatter};
use thiserror::Error as ThisError;

/// The number of 32-bit words in a header without options
const BASE_HEADER_WORDS: u8 = 5;
/// The number of bytes in a header without options
pub const BASE_HEADER_OCTETS: usize = BASE_HEADER_WORDS as usize * 4;

/// A transport segment header.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Source Port          |       Destination Port        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Sequence Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Acknowledgment Number                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Data |     Reserved    |Flags|            Window             |
/// | Offset|                 |     |                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           Checksum            |         Urgent Pointer        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// The sequence number of the first data octet in this segment, or the
    /// initial sequence number if SYN is set.
    pub seq: u32,
    /// The next sequence number the sender expects to receive. Meaningful
    /// only when ACK is set.
    pub ack: u32,
    /// The number of 32-bit words in the header
    pub data_offset: u8,
    pub ctl: Control,
    /// How many octets past `ack` the sender is willing to accept
    pub wnd: u16,
    pub urg: u16,
    pub checksum: u16,
}

impl TcpHeader {
    /// Parses a header from the front of a segment whose checksum has
    /// already been verified.
    fn from_bytes(mut bytes: impl Iterator<Item = u8>) -> Result<Self, ParseError> {
        const HTS: ParseError = ParseError::HeaderTooShort;
        let src_port = bytes.next_u16_be().ok_or(HTS)?;
        let dst_port = bytes.next_u16_be().ok_or(HTS)?;
        let seq = bytes.next_u32_be().ok_or(HTS)?;
        let ack = bytes.next_u32_be().ok_or(HTS)?;
        let data_offset = bytes.next_u8().ok_or(HTS)? >> 4;
        let ctl = Control::from(bytes.next_u8().ok_or(HTS)?);
        let wnd = bytes.next_u16_be().ok_or(HTS)?;
        let checksum = bytes.next_u16_be().ok_or(HTS)?;
        let urg = bytes.next_u16_be().ok_or(HTS)?;

        if data_offset < BASE_HEADER_WORDS {
            Err(ParseError::InvalidDataOffset(data_offset))?
        }

        Ok(Self {
            src_port,
            dst_port,
            seq,
            ack,
            data_offset,
            ctl,
            wnd,
            urg,
            checksum,
        })
    }

    /// Size of the header in bytes
    pub fn bytes(&self) -> usize {
        self.data_offset as usize * 4
    }

    /// Convert the header to its serialized format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BASE_HEADER_OCTETS);
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.ack.to_be_bytes());
        out.push(self.data_offset << 4);
        out.push(self.ctl.into());
        out.extend_from_slice(&self.wnd.to_be_bytes());
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&self.urg.to_be_bytes());
        out
    }
}

/// Sums the pseudo header that precedes every segment for checksum purposes.
fn pseudo_header(src_address: Ipv4Address, dst_address: Ipv4Address, length: u16) -> Checksum {
    let mut checksum = Checksum::new();
    checksum.add_u32(src_address.to_bytes());
    checksum.add_u32(dst_address.to_bytes());
    checksum.add_u8(0, ProtocolNumber::Tcp.into());
    checksum.add_u16(length);
    checksum
}

/// A header together with the data it carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TcpSegment {
    pub header: TcpHeader,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    /// Parses a segment carried from `src_address` to `dst_address`,
    /// verifying the checksum over the pseudo header, header, and data.
    pub fn decode(
        bytes: &[u8],
        src_address: Ipv4Address,
        dst_address: Ipv4Address,
    ) -> Result<Self, ParseError> {
        let length: u16 = bytes
            .len()
            .try_into()
            .map_err(|_| ParseError::PacketTooLong)?;
        let mut checksum = pseudo_header(src_address, dst_address, length);
        checksum.accumulate_remainder(bytes.iter().cloned());
        let actual = checksum.as_u16();

        let header = TcpHeader::from_bytes(bytes.iter().cloned())?;
        if actual != 0 {
            Err(ParseError::Checksum {
                actual,
                expected: header.checksum,
            })?
        }
        let start = header.bytes();
        if start > bytes.len() {
            Err(ParseError::HeaderTooShort)?
        }
        Ok(Self {
            header,
            payload: bytes[start..].to_vec(),
        })
    }

    /// Serializes the header and payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.header.serialize();
        out.extend_from_slice(&self.payload);
        out
    }

    /// The amount of sequence space the segment occupies, counting SYN and
    /// FIN as one each.
    pub fn seq_len(&self) -> u32 {
        self.payload.len() as u32 + self.header.ctl.syn() as u32 + self.header.ctl.fin() as u32
    }
}

/// An error that occurred while parsing a segment
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum ParseError {
    #[error("Too few bytes to constitute a TCP header")]
    HeaderTooShort,
    #[error("The segment length could not fit into a u16")]
    PacketTooLong,
    #[error(
        "The segment checksum summed to {actual:#06x} instead of zero (header field {expected:#06x})"
    )]
    Checksum { actual: u16, expected: u16 },
    #[error("A data offset of {0} words is smaller than a header")]
    InvalidDataOffset(u8),
}

/// Used for building a segment
#[derive(Debug)]
pub struct TcpHeaderBuilder(TcpHeader);

impl TcpHeaderBuilder {
    /// Initialize the header with defaults and the given values
    pub fn new(src_port: u16, dst_port: u16, seq: u32) -> Self {
        Self(TcpHeader {
            src_port,
            dst_port,
            seq,
            wnd: 0,
            ack: 0,
            urg: 0,
            ctl: Control::default(),

            // Filled in by .build()
            data_offset: 0,
            checksum: 0,
        })
    }

    /// Set the window size
    pub fn wnd(mut self, wnd: u16) -> Self {
        self.0.wnd = wnd;
        self
    }

    /// Set the acknowledgement number
    pub fn ack(mut self, ack: u32) -> Self {
        self.0.ack = ack;
        self.0.ctl.set_ack(true);
        self
    }

    pub fn syn(mut self) -> Self {
        self.0.ctl.set_syn(true);
        self
    }

    pub fn fin(mut self) -> Self {
        self.0.ctl.set_fin(true);
        self
    }

    #[allow(unused)]
    pub fn rst(mut self) -> Self {
        self.0.ctl.set_rst(true);
        self
    }

    /// Finishes the segment, computing the checksum for a trip from
    /// `src_address` to `dst_address`.
    pub fn build(
        self,
        src_address: Ipv4Address,
        dst_address: Ipv4Address,
        payload: Vec<u8>,
    ) -> Result<TcpSegment, BuildHeaderError> {
        let length: u16 = (payload.len() + BASE_HEADER_OCTETS)
            .try_into()
            .map_err(|_| BuildHeaderError::OverlyLongPayload)?;
        let mut header = self.0;
        header.data_offset = BASE_HEADER_WORDS;
        header.checksum = 0;

        let mut checksum = pseudo_header(src_address, dst_address, length);
        checksum.accumulate_remainder(header.serialize().into_iter());
        checksum.accumulate_remainder(payload.iter().cloned());
        header.checksum = checksum.as_u16();
        Ok(TcpSegment { header, payload })
    }
}

/// An error that occurred while building a segment
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum BuildHeaderError {
    #[error("The TCP payload is longer than can fit into a single packet")]
    OverlyLongPayload,
}

/// The control bits of a header
#[derive(Default, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Control(u8);

impl Control {
    const FIN: u8 = 0;
    const SYN: u8 = 1;
    const RST: u8 = 2;
    const PSH: u8 = 3;
    const ACK: u8 = 4;
    const URG: u8 = 5;

    pub const fn ack(self) -> bool {
        self.bit(Self::ACK)
    }

    pub fn set_ack(&mut self, state: bool) {
        self.set_bit(Self::ACK, state);
    }

    pub const fn rst(self) -> bool {
        self.bit(Self::RST)
    }

    pub fn set_rst(&mut self, state: bool) {
        self.set_bit(Self::RST, state);
    }

    pub const fn syn(self) -> bool {
        self.bit(Self::SYN)
    }

    pub fn set_syn(&mut self, state: bool) {
        self.set_bit(Self::SYN, state);
    }

    pub const fn fin(self) -> bool {
        self.bit(Self::FIN)
    }

    pub fn set_fin(&mut self, state: bool) {
        self.set_bit(Self::FIN, state);
    }

    const fn bit(self, bit: u8) -> bool {
        (self.0 >> bit) & 0b1 == 1
    }

    fn set_bit(&mut self, bit: u8, state: bool) {
        self.0 = (self.0 & !(1 << bit)) | ((state as u8) << bit);
    }
}

impl From<u8> for Control {
    fn from(n: u8) -> Self {
        Self(n)
    }
}

impl From<Control> for u8 {
    fn from(control: Control) -> Self {
        control.0
    }
}

impl Display for Control {
    /// Writes the set flags in the compact form `SYN|ACK`, or `-` if none are
    /// set.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::URG, "URG"),
            (Self::ACK, "ACK"),
            (Self::PSH, "PSH"),
            (Self::RST, "RST"),
            (Self::SYN, "SYN"),
            (Self::FIN, "FIN"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(bit, _)| self.bit(*bit))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

impl Debug for Control {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Control({})", self)
    }
}
