//     1          2          3
// ----------|----------|----------
//        RCV.NXT    RCV.NXT
//                  +RCV.WND
//
// 1 - old sequence numbers which have been acknowledged
// 2 - sequence numbers allowed for new reception
// 3 - future sequence numbers which are not yet allowed
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct ReceiveSequenceSpace {
    /// Initial receive sequence number
    pub irs: u32,
    /// Next sequence number expected on an incoming segment, and is the
    /// left or lower edge of the receive window
    pub nxt: u32,
    /// Where the peer's FIN sits, once one has arrived
    pub fin: Option<u32>,
}

impl ReceiveSequenceSpace {
    /// The space after a SYN at `irs`.
    pub fn new(irs: u32) -> Self {
        Self {
            irs,
            nxt: irs.wrapping_add(1),
            fin: None,
        }
    }
}
