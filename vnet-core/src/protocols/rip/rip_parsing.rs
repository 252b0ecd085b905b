use crate::protocols::{ipv4::Ipv4Address, utility::BytesExt};
use thiserror::Error as ThisError;

/// The command of a RIP message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Asks the receiver for its full routing table
    Request,
    /// Carries routes
    Response,
}

impl TryFrom<u16> for Command {
    type Error = ParseError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            other => Err(ParseError::UnknownCommand(other)),
        }
    }
}

impl From<Command> for u16 {
    fn from(command: Command) -> Self {
        match command {
            Command::Request => 1,
            Command::Response => 2,
        }
    }
}

/// One advertised route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RipEntry {
    pub cost: u32,
    pub destination: Ipv4Address,
}

/// A RIP message, laid out on the wire as
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            Command            |          Num Entries          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                              Cost                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            Address                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       ... more entries                        |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RipMessage {
    pub command: Command,
    pub entries: Vec<RipEntry>,
}

impl RipMessage {
    pub fn request() -> Self {
        Self {
            command: Command::Request,
            entries: vec![],
        }
    }

    pub fn response(entries: Vec<RipEntry>) -> Self {
        Self {
            command: Command::Response,
            entries,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        const TS: ParseError = ParseError::TooShort;
        let mut bytes = bytes.iter().cloned();
        let command = Command::try_from(bytes.next_u16_be().ok_or(TS)?)?;
        let count = bytes.next_u16_be().ok_or(TS)?;
        let entries = (0..count)
            .map(|_| {
                let cost = bytes.next_u32_be().ok_or(TS)?;
                let destination = bytes.next_ipv4addr().ok_or(TS)?;
                Ok(RipEntry { cost, destination })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;
        if bytes.next().is_some() {
            Err(ParseError::TooLong)?
        }
        Ok(Self { command, entries })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BuildError> {
        let count: u16 = self
            .entries
            .len()
            .try_into()
            .map_err(|_| BuildError::TooManyEntries)?;
        let mut out = Vec::with_capacity(4 + 8 * self.entries.len());
        out.extend_from_slice(&u16::from(self.command).to_be_bytes());
        out.extend_from_slice(&count.to_be_bytes());
        for entry in self.entries.iter() {
            out.extend_from_slice(&entry.cost.to_be_bytes());
            out.extend_from_slice(&entry.destination.to_bytes());
        }
        Ok(out)
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("The message ended before its entries did")]
    TooShort,
    #[error("The message has more bytes than its entry count allows")]
    TooLong,
    #[error("Unknown RIP command {0}")]
    UnknownCommand(u16),
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    #[error("Too many entries for one message")]
    TooManyEntries,
}
