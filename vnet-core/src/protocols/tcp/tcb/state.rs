use crate::protocols::tcp::SocketError;
use std::fmt::{self, Display, Formatter};

/// The state of a connection. The diagram below shows the transitions
/// [`State::next`] allows.
///
/// ```text
///                             +---------+ ---------\      active OPEN
///                             |  CLOSED |            \    -----------
///                             +---------+<---------\   \   create TCB
///                               |     ^              \   \  snd SYN
///                  passive OPEN |     |   CLOSE        \   \
///                  ------------ |     | ----------       \   \
///                   create TCB  |     | delete TCB         \   \
///                               V     |                      \   \
///                             +---------+            CLOSE    |    \
///                             |  LISTEN |          ---------- |     |
///                             +---------+          delete TCB |     |
///                  rcv SYN      |     |     SEND              |     |
///                 -----------   |     |    -------            |     V
/// +--------+      snd SYN,ACK  /       \   snd SYN          +--------+
/// |        |<-----------------           ------------------>|        |
/// |  SYN   |                    rcv SYN                     |  SYN   |
/// |  RCVD  |<-----------------------------------------------|  SENT  |
/// |        |                  snd SYN,ACK                   |        |
/// |        |------------------           -------------------|        |
/// +--------+   rcv ACK of SYN  \       /  rcv SYN,ACK       +--------+
///    |         --------------   |     |   -----------
///    |                x         |     |     snd ACK
///    |                          V     V
///    |  CLOSE                 +---------+
///    | -------                |  ESTAB  |
///    | snd FIN                +---------+
///    |                 CLOSE    |     |    rcv FIN
///    V                -------   |     |    -------
/// +---------+         snd FIN  /       \   snd ACK         +---------+
/// |  FIN    |<----------------          ------------------>|  CLOSE  |
/// | WAIT-1  |------------------                            |   WAIT  |
/// +---------+          rcv FIN  \                          +---------+
///   | rcv ACK of FIN   -------   |                          CLOSE  |
///   | --------------   snd ACK   |                         ------- |
///   V        x                   V                         snd FIN V
/// +---------+               +---------+                    +---------+
/// |FINWAIT-2|               | CLOSING |                    | LAST-ACK|
/// +---------+               +---------+                    +---------+
///   |              rcv ACK of FIN |                 rcv ACK of FIN |
///   |  rcv FIN     -------------- |    Timeout=60s  -------------- |
///   |  -------            x       V    ------------        x       V
///    \ snd ACK              +---------+delete TCB          +---------+
///      -------------------->|TIME-WAIT|------------------->| CLOSED  |
///                           +---------+                    +---------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// No connection. Fresh sockets start here.
    Closed,
    /// Waiting for a connection request from any remote TCP.
    Listen,
    /// Waiting for a matching connection request after having sent a
    /// connection request.
    SynSent,
    /// Waiting for a confirming acknowledgment after having both received
    /// and sent a connection request.
    SynReceived,
    /// An open connection. Data flows both ways.
    Established,
    /// Our FIN is out. Waiting for its acknowledgment or the peer's FIN.
    FinWait1,
    /// Our FIN was acknowledged. Waiting for the peer's FIN.
    FinWait2,
    /// Both sides sent FIN, ours is not yet acknowledged.
    Closing,
    /// Waiting long enough for the peer to have seen the last ACK.
    TimeWait,
    /// The peer finished sending. Waiting for the local user to close.
    CloseWait,
    /// Waiting for the acknowledgment of our FIN after the peer's.
    LastAck,
    /// Not a state a connection can be in. The result of a transition the
    /// table does not allow.
    Invalid,
}

/// Something that happens to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ActiveOpen,
    PassiveOpen,
    ReceiveSyn,
    SendSyn,
    ReceiveAck,
    ReceiveSynAck,
    Receive,
    Send,
    Close,
    SendFin,
    ReceiveFin,
    ReceiveAckOfFin,
    Timeout,
}

impl State {
    /// The state a connection in `self` moves to when `action` happens, or
    /// [`State::Invalid`] if the action is not allowed.
    pub const fn next(self, action: Action) -> State {
        use Action::*;
        use State::*;
        match (self, action) {
            (Closed, ActiveOpen) => SynSent,
            (Closed, PassiveOpen) => Listen,
            (Closed, Close) => Closed,

            (Listen, ReceiveSyn) => SynReceived,
            (Listen, SendSyn) => SynSent,
            (Listen, Close) => Closed,

            (SynSent, ReceiveSyn) => SynReceived,
            (SynSent, ReceiveSynAck) => Established,
            (SynSent, Close) => Closed,

            (SynReceived, ReceiveAck) => Established,
            (SynReceived, SendFin) => FinWait1,

            (Established, Receive) => Established,
            (Established, Send) => Established,
            (Established, SendFin) => FinWait1,
            (Established, ReceiveFin) => CloseWait,

            (FinWait1, Receive) => FinWait1,
            (FinWait1, ReceiveFin) => Closing,
            (FinWait1, ReceiveAckOfFin) => FinWait2,

            (FinWait2, Receive) => FinWait2,
            (FinWait2, ReceiveFin) => TimeWait,

            (Closing, Receive) => Closing,
            (Closing, ReceiveAckOfFin) => TimeWait,

            (TimeWait, Receive) => TimeWait,
            (TimeWait, Timeout) => Closed,

            (CloseWait, Receive) => CloseWait,
            (CloseWait, Send) => CloseWait,
            (CloseWait, SendFin) => LastAck,

            (LastAck, Receive) => LastAck,
            (LastAck, ReceiveAckOfFin) => Closed,

            _ => Invalid,
        }
    }

    pub const fn allows(self, action: Action) -> bool {
        !matches!(self.next(action), State::Invalid)
    }

    /// The error reported to a user who attempts `action` in a state that
    /// does not allow it.
    pub const fn error(self, action: Action) -> SocketError {
        use Action::*;
        use State::*;
        match action {
            ActiveOpen | PassiveOpen => SocketError::AlreadyOpen,
            Receive | Send => match self {
                Closed | FinWait1 | FinWait2 | Closing | TimeWait | CloseWait | LastAck => {
                    SocketError::ConnectionReset
                }
                _ => SocketError::NotSupported,
            },
            SendFin => match self {
                Closing | TimeWait | LastAck => SocketError::ConnectionReset,
                _ => SocketError::NotSupported,
            },
            _ => SocketError::NotSupported,
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN_SENT",
            State::SynReceived => "SYN_RCVD",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN_WAIT1",
            State::FinWait2 => "FIN_WAIT2",
            State::Closing => "CLOSING",
            State::TimeWait => "TIME_WAIT",
            State::CloseWait => "CLOSE_WAIT",
            State::LastAck => "LAST_ACK",
            State::Invalid => "INVALID",
        };
        write!(f, "{}", name)
    }
}
