use thiserror::Error as ThisError;

/// The ways a socket operation can fail.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketError {
    #[error("The connection is already open")]
    AlreadyOpen,
    #[error("Operation not supported in this state")]
    NotSupported,
    #[error("The connection is closing")]
    ConnectionReset,
    #[error("The socket is in a bad state for this operation")]
    BadDescriptor,
    #[error("No such socket")]
    NotSocket,
    #[error("The socket is not connected")]
    NotConnected,
    #[error("No route to host")]
    HostUnreachable,
    #[error("Address already in use")]
    AddressInUse,
    #[error("Failed to send on the network")]
    CommunicationError,
    #[error("Timed out waiting for the peer")]
    TimerExpired,
    #[error("No free ports remain")]
    NoFreePorts,
    #[error("The send buffer is full")]
    WouldBlock,
    #[error("Reading was shut down")]
    NotPermitted,
    #[error("Unknown shutdown type")]
    InvalidShutdown,
}

impl SocketError {
    /// The negative POSIX error number for the failure.
    pub const fn errno(self) -> i32 {
        -match self {
            Self::AlreadyOpen => 114,
            Self::NotSupported => 95,
            Self::ConnectionReset => 104,
            Self::BadDescriptor => 77,
            Self::NotSocket => 88,
            Self::NotConnected => 107,
            Self::HostUnreachable => 113,
            Self::AddressInUse => 98,
            Self::CommunicationError => 70,
            Self::TimerExpired => 62,
            Self::NoFreePorts => 99,
            Self::WouldBlock => 11,
            Self::NotPermitted => 1,
            Self::InvalidShutdown => 3,
        }
    }
}
