//! The transmission control block: one connection's sequence spaces,
//! buffers, and state, along with the rules for changing them.
//!
//! A [`Tcb`] performs no I/O and never reads the clock. Callers hand it
//! segments and the current time, then collect what it wants sent with
//! [`Tcb::take_outgoing`].

use super::{
    tcp_parsing::{TcpHeaderBuilder, TcpSegment},
    SocketError, DEFAULT_WINDOW, TCP_MTU,
};
use crate::protocols::utility::Endpoints;
use std::collections::VecDeque;
use tokio::time::Instant;

mod modular_cmp;
mod reassembly;
mod receive_sequence_space;
pub mod rto;
mod send_sequence_space;
mod state;

#[cfg(test)]
mod tests;

use modular_cmp::{mod_between, mod_lt};
use reassembly::Reassembly;
use receive_sequence_space::ReceiveSequenceSpace;
use rto::Rto;
use send_sequence_space::SendSequenceSpace;
pub use state::{Action, State};

/// How many bytes a socket buffers for sending.
const SEND_BUFFER: usize = DEFAULT_WINDOW as usize;
/// Duplicate ACKs that trigger a fast retransmit.
const DUP_ACK_THRESHOLD: u32 = 3;

/// The result of a segment arriving during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// The handshake moved forward but is not done.
    Pending,
    /// The connection is now established.
    Established,
    /// The segment did not fit the handshake and was dropped.
    Ignored,
}

/// What the owner of a connection must do after a segment arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Continue,
    /// The connection just entered TIME-WAIT and needs its timer started.
    TimeWait,
    /// The connection is closed and its resources can go.
    Closed,
}

#[derive(Debug)]
pub struct Tcb {
    endpoints: Endpoints,
    state: State,
    snd: SendSequenceSpace,
    rcv: ReceiveSequenceSpace,
    /// Written bytes from SND.UNA onward
    send_buffer: VecDeque<u8>,
    reassembly: Reassembly,
    /// In-order bytes waiting for the user to read them
    readable: VecDeque<u8>,
    /// Set once the peer's FIN is reached in sequence
    eof: bool,
    read_shut: bool,
    rto: Rto,
    /// When the retransmission timer last started
    timer: Option<Instant>,
    outgoing: Vec<TcpSegment>,
}

impl Tcb {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            state: State::Closed,
            snd: Default::default(),
            rcv: Default::default(),
            send_buffer: VecDeque::new(),
            reassembly: Reassembly::new(DEFAULT_WINDOW as usize),
            readable: VecDeque::new(),
            eof: false,
            read_shut: false,
            rto: Rto::new(),
            timer: None,
            outgoing: vec![],
        }
    }

    /// Creates the control block for the connection a SYN asks for and
    /// answers it with SYN+ACK.
    pub fn accept(endpoints: Endpoints, syn: &TcpSegment, iss: u32) -> Result<Self, SocketError> {
        let mut tcb = Self::new(endpoints);
        tcb.state = State::Listen;
        tcb.check(Action::ReceiveSyn)?;
        tcb.rcv = ReceiveSequenceSpace::new(syn.header.seq);
        tcb.snd = SendSequenceSpace::new(iss);
        tcb.snd.wnd = syn.header.wnd;
        tcb.change_state(Action::ReceiveSyn);
        tcb.enqueue_syn();
        Ok(tcb)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn endpoints(&self) -> Endpoints {
        self.endpoints
    }

    pub fn set_local_port(&mut self, port: u16) {
        self.endpoints.local.port = port;
    }

    /// Fails with the error for `action` if the current state forbids it.
    pub fn check(&self, action: Action) -> Result<(), SocketError> {
        if self.state.allows(action) {
            Ok(())
        } else {
            Err(self.state.error(action))
        }
    }

    /// The only place the state changes. Callers check the action first.
    fn change_state(&mut self, action: Action) {
        let next = self.state.next(action);
        tracing::trace!(
            "{} -> {} on {:?} ({})",
            self.state,
            next,
            action,
            self.endpoints.local
        );
        self.state = next;
    }

    /// Begins an active open by sending a SYN.
    pub fn open(&mut self, endpoints: Endpoints, iss: u32) -> Result<(), SocketError> {
        self.check(Action::ActiveOpen)?;
        self.endpoints = endpoints;
        self.snd = SendSequenceSpace::new(iss);
        self.change_state(Action::ActiveOpen);
        self.enqueue_syn();
        Ok(())
    }

    pub fn listen(&mut self) -> Result<(), SocketError> {
        self.check(Action::PassiveOpen)?;
        self.change_state(Action::PassiveOpen);
        Ok(())
    }

    /// Closes a connection that never got going.
    pub fn close(&mut self) -> Result<(), SocketError> {
        self.check(Action::Close)?;
        self.change_state(Action::Close);
        Ok(())
    }

    /// Ends TIME-WAIT.
    pub fn time_out(&mut self) -> Result<(), SocketError> {
        self.check(Action::Timeout)?;
        self.change_state(Action::Timeout);
        Ok(())
    }

    /// Sends our SYN again, with an ACK if the peer's SYN has arrived.
    pub fn resend_syn(&mut self) {
        if matches!(self.state, State::SynSent | State::SynReceived) {
            self.enqueue_syn();
        }
    }

    /// Handles a segment that arrives before the connection is established.
    pub fn handshake_arrives(
        &mut self,
        seg: TcpSegment,
        now: Instant,
    ) -> Result<Handshake, SocketError> {
        let ctl = seg.header.ctl;
        let expected_ack = self.snd.iss.wrapping_add(1);
        match (self.state, ctl.syn(), ctl.ack()) {
            (State::SynSent, true, true) => {
                if seg.header.ack != expected_ack {
                    return Ok(Handshake::Ignored);
                }
                self.check(Action::ReceiveSynAck)?;
                self.rcv = ReceiveSequenceSpace::new(seg.header.seq);
                self.synchronize(seg.header.ack, seg.header.wnd);
                self.change_state(Action::ReceiveSynAck);
                self.enqueue_ack();
                Ok(Handshake::Established)
            }

            // Simultaneous open. The peer's SYN crossed ours.
            (State::SynSent, true, false) => {
                self.check(Action::ReceiveSyn)?;
                self.rcv = ReceiveSequenceSpace::new(seg.header.seq);
                self.snd.wnd = seg.header.wnd;
                self.change_state(Action::ReceiveSyn);
                self.enqueue_syn();
                Ok(Handshake::Pending)
            }

            // The peer never saw our SYN+ACK and sent its SYN again
            (State::SynReceived, true, false) => {
                if seg.header.seq == self.rcv.irs {
                    self.enqueue_syn();
                }
                Ok(Handshake::Pending)
            }

            (State::SynReceived, syn, true) => {
                let expected_seq = if syn { self.rcv.irs } else { self.rcv.nxt };
                if seg.header.ack != expected_ack || seg.header.seq != expected_seq {
                    return Ok(Handshake::Ignored);
                }
                self.check(Action::ReceiveAck)?;
                self.synchronize(seg.header.ack, seg.header.wnd);
                self.change_state(Action::ReceiveAck);
                if syn {
                    self.enqueue_ack();
                } else if !seg.payload.is_empty() || ctl.fin() {
                    // The handshake ACK was lost but data carrying the same
                    // acknowledgment arrived
                    self.segment_arrives(seg, now);
                }
                Ok(Handshake::Established)
            }

            _ => Ok(Handshake::Ignored),
        }
    }

    fn synchronize(&mut self, ack: u32, wnd: u16) {
        self.snd.una = ack;
        self.snd.nxt = ack;
        self.snd.wnd = wnd;
        self.snd.dup_acks = 0;
    }

    /// Handles a segment on an established or closing connection.
    pub fn segment_arrives(&mut self, seg: TcpSegment, now: Instant) -> Arrival {
        let TcpSegment { header, payload } = seg;
        if header.ctl.syn() {
            // A retransmitted SYN+ACK means our handshake ACK was lost
            self.enqueue_ack();
            return Arrival::Continue;
        }

        let before = self.state;
        if header.ctl.ack() {
            self.rto.on_ack(header.ack, now);
            let pure = payload.is_empty() && !header.ctl.fin();
            self.ack_arrives(header.ack, header.wnd, pure, now);
        }
        if !payload.is_empty() && self.state.allows(Action::Receive) {
            self.data_arrives(header.seq, &payload);
        }
        if header.ctl.fin() {
            self.fin_arrives(header.seq.wrapping_add(payload.len() as u32));
        }
        if !payload.is_empty() || header.ctl.fin() {
            self.enqueue_ack();
        }

        match self.state {
            State::Closed => Arrival::Closed,
            State::TimeWait if before != State::TimeWait => Arrival::TimeWait,
            _ => Arrival::Continue,
        }
    }

    fn ack_arrives(&mut self, ack: u32, wnd: u16, pure: bool, now: Instant) {
        if !mod_between(self.snd.una, ack, self.snd.nxt) {
            return;
        }
        self.snd.wnd = wnd;

        if ack == self.snd.una {
            if pure && self.snd.in_flight() > 0 {
                self.snd.dup_acks += 1;
            }
            return;
        }

        let acked = ack.wrapping_sub(self.snd.una) as usize;
        let data = acked.min(self.send_buffer.len());
        self.send_buffer.drain(..data);
        self.snd.una = ack;
        self.snd.dup_acks = 0;
        self.timer = (self.snd.in_flight() > 0).then_some(now);

        let fin_acked = self.snd.fin.map(|fin| fin.wrapping_add(1)) == Some(ack);
        if fin_acked && self.state.allows(Action::ReceiveAckOfFin) {
            self.change_state(Action::ReceiveAckOfFin);
        }
    }

    fn data_arrives(&mut self, seq: u32, data: &[u8]) {
        let (offset, data) = if mod_lt(seq, self.rcv.nxt) {
            let seen = self.rcv.nxt.wrapping_sub(seq) as usize;
            if seen >= data.len() {
                return;
            }
            (0, &data[seen..])
        } else {
            (seq.wrapping_sub(self.rcv.nxt) as usize, data)
        };

        let window = self.recv_window() as usize;
        if offset >= window {
            return;
        }
        let data = &data[..data.len().min(window - offset)];

        if offset == 0 {
            let delivered = self.reassembly.deliver(data);
            self.rcv.nxt = self.rcv.nxt.wrapping_add(delivered.len() as u32);
            self.readable.extend(delivered);
            self.consume_fin();
        } else {
            self.reassembly.insert(offset, data);
        }
    }

    fn fin_arrives(&mut self, fin: u32) {
        // A repeated FIN only needs the ACK sent again
        if self.rcv.fin.is_some() || !self.state.allows(Action::ReceiveFin) {
            return;
        }
        self.rcv.fin = Some(fin);
        self.change_state(Action::ReceiveFin);
        self.consume_fin();
    }

    /// Passes the peer's FIN once everything before it has arrived.
    fn consume_fin(&mut self) {
        if !self.eof && self.rcv.fin == Some(self.rcv.nxt) {
            self.eof = true;
            self.rcv.nxt = self.rcv.nxt.wrapping_add(1);
        }
    }

    /// Queues whatever should go out at `now`: retransmissions first, then
    /// new data as far as the peer's window allows.
    pub fn poll_send(&mut self, now: Instant) {
        if matches!(
            self.state,
            State::Closed | State::Listen | State::SynSent | State::SynReceived | State::Invalid
        ) {
            return;
        }

        if self.snd.in_flight() > 0 {
            let expired = self
                .timer
                .map_or(false, |start| now >= start + self.rto.rto());
            if expired {
                tracing::debug!(
                    "Retransmission timeout after {:?} ({})",
                    self.rto.rto(),
                    self.endpoints.local
                );
                self.retransmit(now);
            } else if self.snd.dup_acks >= DUP_ACK_THRESHOLD {
                tracing::debug!("Fast retransmit of {}", self.snd.una);
                self.retransmit(now);
            }
        }

        while self.snd.fin.is_none() {
            let sent = (self.snd.in_flight() as usize).min(self.send_buffer.len());
            let unsent = self.send_buffer.len() - sent;
            if unsent == 0 {
                break;
            }
            let length = match self.snd.usable() as usize {
                // Probe a closed window one byte at a time
                0 if self.snd.in_flight() == 0 => 1,
                0 => break,
                usable => unsent.min(usable).min(TCP_MTU),
            };
            let data = self
                .send_buffer
                .range(sent..sent + length)
                .copied()
                .collect();
            let seq = self.snd.nxt;
            self.enqueue_data(seq, data, false);
            self.snd.nxt = seq.wrapping_add(length as u32);
            self.timer.get_or_insert(now);
            self.rto.probe(self.snd.nxt, now);
        }
    }

    /// Sends the oldest unacknowledged segment again.
    fn retransmit(&mut self, now: Instant) {
        let seq = self.snd.una;
        let data = (self.snd.in_flight() as usize).min(self.send_buffer.len());
        if data > 0 {
            let length = data.min(TCP_MTU);
            let fin = self.snd.fin == Some(seq.wrapping_add(length as u32));
            let bytes = self.send_buffer.range(..length).copied().collect();
            self.enqueue_data(seq, bytes, fin);
        } else if self.snd.fin == Some(seq) {
            self.enqueue_data(seq, vec![], true);
        }
        self.snd.dup_acks = 0;
        self.timer = Some(now);
        self.rto.clear_probe();
    }

    /// When the retransmission timer goes off, if it is running.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.snd.in_flight() == 0 {
            return None;
        }
        self.timer.map(|start| start + self.rto.rto())
    }

    /// Buffers as much of `data` as fits for sending.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, SocketError> {
        self.check(Action::Send)
            .map_err(|_| SocketError::NotConnected)?;
        let free = SEND_BUFFER.saturating_sub(self.send_buffer.len());
        if free == 0 && !data.is_empty() {
            Err(SocketError::WouldBlock)?
        }
        let n = free.min(data.len());
        self.send_buffer.extend(&data[..n]);
        Ok(n)
    }

    /// Takes up to `n` received bytes. `Ok(None)` means nothing is ready
    /// yet, and an empty vector means the peer has finished sending.
    pub fn read(&mut self, n: usize) -> Result<Option<Vec<u8>>, SocketError> {
        if self.read_shut {
            Err(SocketError::NotPermitted)?
        }
        if !self.readable.is_empty() {
            let was_small = (self.recv_window() as usize) < TCP_MTU;
            let n = n.min(self.readable.len());
            let out = self.readable.drain(..n).collect();
            if was_small && self.state.allows(Action::Receive) {
                // Let a stalled peer know the window opened
                self.enqueue_ack();
            }
            return Ok(Some(out));
        }
        if self.eof {
            return Ok(Some(vec![]));
        }
        self.check(Action::Receive)?;
        Ok(None)
    }

    pub fn shut_read(&mut self) {
        self.read_shut = true;
    }

    /// Has every written byte gone out at least once?
    pub fn all_sent(&self) -> bool {
        self.send_buffer.len() <= self.snd.in_flight() as usize
    }

    /// Sends FIN after the last written byte.
    pub fn send_fin(&mut self, now: Instant) -> Result<(), SocketError> {
        self.check(Action::SendFin)?;
        let seq = self.snd.nxt;
        self.snd.fin = Some(seq);
        self.enqueue_data(seq, vec![], true);
        self.snd.nxt = seq.wrapping_add(1);
        self.timer.get_or_insert(now);
        self.change_state(Action::SendFin);
        Ok(())
    }

    /// How much more the peer will accept from us.
    pub fn send_window(&self) -> u32 {
        self.snd.usable()
    }

    /// How much more we will accept from the peer.
    pub fn recv_window(&self) -> u16 {
        self.reassembly
            .capacity()
            .saturating_sub(self.readable.len()) as u16
    }

    pub fn take_outgoing(&mut self) -> Vec<TcpSegment> {
        std::mem::take(&mut self.outgoing)
    }

    fn enqueue_syn(&mut self) {
        let mut builder = self.header_builder(self.snd.iss).syn();
        if self.state == State::SynReceived {
            builder = builder.ack(self.rcv.nxt);
        }
        self.enqueue(builder, vec![]);
    }

    fn enqueue_ack(&mut self) {
        self.enqueue_data(self.snd.nxt, vec![], false);
    }

    fn enqueue_data(&mut self, seq: u32, payload: Vec<u8>, fin: bool) {
        let mut builder = self.header_builder(seq).ack(self.rcv.nxt);
        if fin {
            builder = builder.fin();
        }
        self.enqueue(builder, payload);
    }

    fn header_builder(&self, seq: u32) -> TcpHeaderBuilder {
        TcpHeaderBuilder::new(self.endpoints.local.port, self.endpoints.remote.port, seq)
            .wnd(self.recv_window())
    }

    fn enqueue(&mut self, builder: TcpHeaderBuilder, payload: Vec<u8>) {
        match builder.build(
            self.endpoints.local.address,
            self.endpoints.remote.address,
            payload,
        ) {
            Ok(segment) => self.outgoing.push(segment),
            Err(e) => tracing::error!("Failed to build a segment: {}", e),
        }
    }
}
