//      1         2          3          4
// ----------|----------|----------|----------
//        SND.UNA    SND.NXT    SND.UNA
//                             +SND.WND
//
// 1 - old sequence numbers which have been acknowledged
// 2 - sequence numbers of unacknowledged data
// 3 - sequence numbers allowed for new data transmission (send window)
// 4 - future sequence numbers which are not yet allowed
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct SendSequenceSpace {
    /// Initial send sequence number
    pub iss: u32,
    /// Oldest unacknowledged sequence number
    pub una: u32,
    /// Next sequence number to be sent
    pub nxt: u32,
    /// The usable window the peer last advertised
    pub wnd: u16,
    /// The sequence number our FIN occupies, once sent
    pub fin: Option<u32>,
    /// Acknowledgments in a row that did not move SND.UNA
    pub dup_acks: u32,
}

impl SendSequenceSpace {
    /// The space for a connection that opens with a SYN at `iss`.
    pub fn new(iss: u32) -> Self {
        Self {
            iss,
            una: iss,
            nxt: iss.wrapping_add(1),
            ..Default::default()
        }
    }

    /// Sequence numbers sent but not yet acknowledged.
    pub fn in_flight(&self) -> u32 {
        self.nxt.wrapping_sub(self.una)
    }

    /// How much more the peer will accept right now.
    pub fn usable(&self) -> u32 {
        (self.wnd as u32).saturating_sub(self.in_flight())
    }
}
