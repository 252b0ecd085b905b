use super::*;
use crate::protocols::{ipv4::Ipv4Address, utility::Endpoint};
use std::time::Duration;

const PEER_A: Endpoints = Endpoints::new(
    Endpoint::new(Ipv4Address::new([10, 0, 0, 1]), 0xcafe),
    Endpoint::new(Ipv4Address::new([10, 0, 0, 2]), 0xdead),
);
const PEER_B: Endpoints = PEER_A.reverse();

fn deliver(from: &mut Tcb, to: &mut Tcb, now: Instant) -> usize {
    let segments = from.take_outgoing();
    let count = segments.len();
    for segment in segments {
        to.segment_arrives(segment, now);
    }
    count
}

fn read_all(tcb: &mut Tcb) -> Vec<u8> {
    tcb.read(usize::MAX).unwrap().unwrap_or_default()
}

/// Runs the three way handshake between a fresh pair.
fn established(now: Instant) -> (Tcb, Tcb) {
    let mut a = Tcb::new(Endpoints::default());
    a.open(PEER_A, 100).unwrap();
    let syn = a.take_outgoing().remove(0);
    let mut b = Tcb::accept(PEER_B, &syn, 300).unwrap();
    let syn_ack = b.take_outgoing().remove(0);
    assert_eq!(a.handshake_arrives(syn_ack, now), Ok(Handshake::Established));
    let ack = a.take_outgoing().remove(0);
    assert_eq!(b.handshake_arrives(ack, now), Ok(Handshake::Established));
    (a, b)
}

#[test]
fn basic_synchronization() {
    // Based on RFC 9293 3.5 Figure 6:
    //
    //     TCP Peer A                                            TCP Peer B
    // 1.  CLOSED                                                LISTEN
    // 2.  SYN-SENT    --> <SEQ=100><CTL=SYN>                --> SYN-RECEIVED
    // 3.  ESTABLISHED <-- <SEQ=300><ACK=101><CTL=SYN,ACK>   <-- SYN-RECEIVED
    // 4.  ESTABLISHED --> <SEQ=101><ACK=301><CTL=ACK>       --> ESTABLISHED
    let now = Instant::now();

    // 2
    let mut peer_a = Tcb::new(Endpoints::default());
    peer_a.open(PEER_A, 100).unwrap();
    assert_eq!(peer_a.state(), State::SynSent);
    let syn = peer_a.take_outgoing().remove(0);
    assert_eq!(syn.header.seq, 100);
    assert!(syn.header.ctl.syn());
    assert!(!syn.header.ctl.ack());

    let mut peer_b = Tcb::accept(PEER_B, &syn, 300).unwrap();
    assert_eq!(peer_b.state(), State::SynReceived);

    // 3
    let syn_ack = peer_b.take_outgoing().remove(0);
    assert_eq!(syn_ack.header.seq, 300);
    assert_eq!(syn_ack.header.ack, 101);
    assert!(syn_ack.header.ctl.syn());
    assert!(syn_ack.header.ctl.ack());

    assert_eq!(
        peer_a.handshake_arrives(syn_ack, now),
        Ok(Handshake::Established)
    );
    assert_eq!(peer_a.state(), State::Established);

    // 4
    let ack = peer_a.take_outgoing().remove(0);
    assert_eq!(ack.header.seq, 101);
    assert_eq!(ack.header.ack, 301);
    assert!(ack.header.ctl.ack());
    assert!(!ack.header.ctl.syn());
    assert_eq!(peer_a.snd.nxt, 101);
    assert_eq!(peer_a.snd.una, 101);

    assert_eq!(peer_b.handshake_arrives(ack, now), Ok(Handshake::Established));
    assert_eq!(peer_b.state(), State::Established);
}

#[test]
fn wrong_ack_is_ignored() {
    let now = Instant::now();
    let mut peer_a = Tcb::new(Endpoints::default());
    peer_a.open(PEER_A, 100).unwrap();
    let syn = peer_a.take_outgoing().remove(0);
    let mut peer_b = Tcb::accept(PEER_B, &syn, 300).unwrap();
    let mut syn_ack = peer_b.take_outgoing().remove(0);
    syn_ack.header.ack = 555;
    assert_eq!(peer_a.handshake_arrives(syn_ack, now), Ok(Handshake::Ignored));
    assert_eq!(peer_a.state(), State::SynSent);
    assert!(peer_a.take_outgoing().is_empty());
}

#[test]
fn simultaneous_initiation() {
    // Based on RFC 9293 3.5 Figure 7:
    //
    //     TCP Peer A                                       TCP Peer B
    // 1.  CLOSED                                           CLOSED
    // 2.  SYN-SENT     --> <SEQ=100><CTL=SYN>              ...
    // 3.  SYN-RECEIVED <-- <SEQ=300><CTL=SYN>              <-- SYN-SENT
    // 4.               ... <SEQ=100><CTL=SYN>              --> SYN-RECEIVED
    // 5.  SYN-RECEIVED --> <SEQ=100><ACK=301><CTL=SYN,ACK> ...
    // 6.  ESTABLISHED  <-- <SEQ=300><ACK=101><CTL=SYN,ACK> <-- SYN-RECEIVED
    // 7.               ... <SEQ=100><ACK=301><CTL=SYN,ACK> --> ESTABLISHED
    let now = Instant::now();
    let mut peer_a = Tcb::new(Endpoints::default());
    let mut peer_b = Tcb::new(Endpoints::default());

    // 2
    peer_a.open(PEER_A, 100).unwrap();
    let a_syn = peer_a.take_outgoing().remove(0);

    // 3
    peer_b.open(PEER_B, 300).unwrap();
    let b_syn = peer_b.take_outgoing().remove(0);
    assert_eq!(peer_a.handshake_arrives(b_syn, now), Ok(Handshake::Pending));
    assert_eq!(peer_a.state(), State::SynReceived);

    // 4
    assert_eq!(peer_b.handshake_arrives(a_syn, now), Ok(Handshake::Pending));
    assert_eq!(peer_b.state(), State::SynReceived);

    // 5
    let a_syn_ack = peer_a.take_outgoing().remove(0);
    assert_eq!(a_syn_ack.header.seq, 100);
    assert_eq!(a_syn_ack.header.ack, 301);
    assert!(a_syn_ack.header.ctl.syn() && a_syn_ack.header.ctl.ack());

    // 6
    let b_syn_ack = peer_b.take_outgoing().remove(0);
    assert_eq!(
        peer_a.handshake_arrives(b_syn_ack, now),
        Ok(Handshake::Established)
    );

    // 7
    assert_eq!(
        peer_b.handshake_arrives(a_syn_ack, now),
        Ok(Handshake::Established)
    );
    assert_eq!(peer_a.snd.nxt, 101);
    assert_eq!(peer_b.snd.nxt, 301);
    assert_eq!(peer_a.rcv.nxt, 301);
    assert_eq!(peer_b.rcv.nxt, 101);
}

#[test]
fn lost_handshake_ack_is_recovered_by_data() {
    let now = Instant::now();
    let mut peer_a = Tcb::new(Endpoints::default());
    peer_a.open(PEER_A, 100).unwrap();
    let syn = peer_a.take_outgoing().remove(0);
    let mut peer_b = Tcb::accept(PEER_B, &syn, 300).unwrap();
    let syn_ack = peer_b.take_outgoing().remove(0);
    peer_a.handshake_arrives(syn_ack, now).unwrap();
    // The final ACK is dropped
    peer_a.take_outgoing();

    peer_a.write(b"early").unwrap();
    peer_a.poll_send(now);
    let data = peer_a.take_outgoing().remove(0);
    assert_eq!(peer_b.handshake_arrives(data, now), Ok(Handshake::Established));
    assert_eq!(read_all(&mut peer_b), b"early");
}

#[test]
fn data_transfer() {
    let now = Instant::now();
    let (mut a, mut b) = established(now);

    assert_eq!(a.write(b"hello world"), Ok(11));
    a.poll_send(now);
    assert_eq!(deliver(&mut a, &mut b, now), 1);
    assert_eq!(read_all(&mut b), b"hello world");
    assert_eq!(b.read(10), Ok(None));

    assert_eq!(a.snd.in_flight(), 11);
    assert_eq!(deliver(&mut b, &mut a, now), 1);
    assert_eq!(a.snd.in_flight(), 0);
    assert!(a.send_buffer.is_empty());
    assert_eq!(a.next_deadline(), None);
}

#[test]
fn segments_respect_the_mtu_and_window() {
    let now = Instant::now();
    let (mut a, mut b) = established(now);
    a.snd.wnd = (TCP_MTU * 2 + 10) as u16;

    let data = vec![7; TCP_MTU * 3];
    assert_eq!(a.write(&data), Ok(data.len()));
    a.poll_send(now);
    let lengths: Vec<_> = a.outgoing.iter().map(|s| s.payload.len()).collect();
    assert_eq!(lengths, [TCP_MTU, TCP_MTU, 10]);
    assert_eq!(a.send_window(), 0);

    deliver(&mut a, &mut b, now);
    deliver(&mut b, &mut a, now);
    a.poll_send(now);
    assert_eq!(a.outgoing.len(), 1);
    assert_eq!(a.outgoing[0].payload.len(), TCP_MTU - 10);
}

#[test]
fn reordered_and_duplicated_segments_reassemble() {
    let now = Instant::now();
    let message: Vec<u8> = (0..10 * TCP_MTU as u32).map(|i| (i % 251) as u8).collect();

    for order in [
        [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
        [9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
        [3, 1, 4, 0, 5, 9, 2, 6, 8, 7],
        [1, 3, 5, 7, 9, 0, 2, 4, 6, 8],
    ] {
        let (mut a, mut b) = established(now);
        a.write(&message).unwrap();
        a.poll_send(now);
        let segments = a.take_outgoing();
        assert_eq!(segments.len(), 10);

        for i in order {
            b.segment_arrives(segments[i].clone(), now);
            // Duplicates change nothing
            b.segment_arrives(segments[i].clone(), now);
        }
        assert_eq!(read_all(&mut b), message);
        assert_eq!(b.reassembly.extent(), 0);
    }
}

#[test]
fn old_segments_are_reacknowledged() {
    let now = Instant::now();
    let (mut a, mut b) = established(now);
    a.write(b"abc").unwrap();
    a.poll_send(now);
    let segment = a.take_outgoing().remove(0);

    b.segment_arrives(segment.clone(), now);
    let first_ack = b.take_outgoing().remove(0);
    let rcv = b.rcv;
    let readable = b.readable.clone();

    b.segment_arrives(segment, now);
    let second_ack = b.take_outgoing().remove(0);
    assert_eq!(first_ack, second_ack);
    assert_eq!(b.rcv, rcv);
    assert_eq!(b.readable, readable);
}

#[test]
fn gap_produces_duplicate_acks_and_fast_retransmit() {
    let now = Instant::now();
    let (mut a, mut b) = established(now);
    let data = vec![1; TCP_MTU * 5];
    a.write(&data).unwrap();
    a.poll_send(now);
    let mut segments = a.take_outgoing();
    assert_eq!(segments.len(), 5);

    // The first segment is lost, the others produce duplicate ACKs
    let lost = segments.remove(0);
    for segment in segments {
        b.segment_arrives(segment, now);
    }
    let acks = b.take_outgoing();
    assert_eq!(acks.len(), 4);
    assert!(acks.iter().all(|ack| ack.header.ack == lost.header.seq));

    let mut acks = acks.into_iter();
    for ack in acks.by_ref().take(3) {
        a.segment_arrives(ack, now);
    }
    assert_eq!(a.snd.dup_acks, 3);
    a.poll_send(now);
    let retransmitted = a.take_outgoing();
    assert_eq!(retransmitted.len(), 1);
    assert_eq!(retransmitted[0], lost);
    assert_eq!(a.snd.dup_acks, 0);

    // A fourth duplicate does not trigger another
    a.segment_arrives(acks.next().unwrap(), now);
    assert_eq!(a.snd.dup_acks, 1);
    a.poll_send(now);
    assert!(a.take_outgoing().is_empty());

    b.segment_arrives(retransmitted[0].clone(), now);
    assert_eq!(read_all(&mut b), data);
    let ack = b.take_outgoing().remove(0);
    assert_eq!(ack.header.ack, a.snd.nxt);
}

#[test]
fn timeout_retransmits() {
    let now = Instant::now();
    let (mut a, _b) = established(now);
    a.write(b"lost").unwrap();
    a.poll_send(now);
    let original = a.take_outgoing().remove(0);

    let deadline = a.next_deadline().unwrap();
    assert_eq!(deadline, now + rto::INITIAL_RTO);
    a.poll_send(deadline - Duration::from_millis(1));
    assert!(a.take_outgoing().is_empty());

    a.poll_send(deadline);
    assert_eq!(a.take_outgoing(), [original]);
    assert_eq!(a.next_deadline(), Some(deadline + rto::INITIAL_RTO));
}

#[test]
fn round_trips_update_the_timeout() {
    let now = Instant::now();
    let (mut a, mut b) = established(now);
    a.write(b"timed").unwrap();
    a.poll_send(now);
    deliver(&mut a, &mut b, now);
    deliver(&mut b, &mut a, now + Duration::from_millis(40));
    assert_eq!(a.rto.srtt(), Some(Duration::from_millis(40)));
    assert_eq!(a.rto.rto(), Duration::from_millis(120));
}

#[test]
fn zero_window_is_probed() {
    let now = Instant::now();
    let (mut a, _b) = established(now);
    a.snd.wnd = 0;
    a.write(b"wait").unwrap();
    a.poll_send(now);
    let probe = a.take_outgoing();
    assert_eq!(probe.len(), 1);
    assert_eq!(probe[0].payload, b"w");

    // Nothing more until the probe is answered
    a.poll_send(now);
    assert!(a.take_outgoing().is_empty());
}

#[test]
fn fin_waits_for_earlier_data() {
    let now = Instant::now();
    let (mut a, mut b) = established(now);
    let data = vec![9; 100];
    a.write(&data).unwrap();
    a.poll_send(now);
    let segment = a.take_outgoing().remove(0);
    a.send_fin(now).unwrap();
    let fin = a.take_outgoing().remove(0);
    assert_eq!(fin.header.seq, segment.header.seq + 100);

    // The FIN overtakes the data
    b.segment_arrives(fin, now);
    assert_eq!(b.state(), State::CloseWait);
    assert_eq!(b.read(1000), Ok(None));

    b.segment_arrives(segment, now);
    assert_eq!(b.read(1000), Ok(Some(data)));
    assert_eq!(b.read(1000), Ok(Some(vec![])));
}

#[test]
fn active_and_passive_close() {
    // Based on RFC 9293 3.6 Figure 12:
    //
    //     TCP Peer A                                           TCP Peer B
    // 1.  ESTABLISHED                                          ESTABLISHED
    // 2.  (Close)
    //     FIN-WAIT-1  --> <SEQ=100><ACK=300><CTL=FIN,ACK>  --> CLOSE-WAIT
    // 3.  FIN-WAIT-2  <-- <SEQ=300><ACK=101><CTL=ACK>      <-- CLOSE-WAIT
    // 4.                                                       (Close)
    //     TIME-WAIT   <-- <SEQ=300><ACK=101><CTL=FIN,ACK>  <-- LAST-ACK
    // 5.  TIME-WAIT   --> <SEQ=101><ACK=301><CTL=ACK>      --> CLOSED
    let now = Instant::now();
    let (mut a, mut b) = established(now);

    // 2
    assert!(a.all_sent());
    a.send_fin(now).unwrap();
    assert_eq!(a.state(), State::FinWait1);
    let fin = a.take_outgoing().remove(0);
    assert!(fin.header.ctl.fin());
    assert_eq!(b.segment_arrives(fin, now), Arrival::Continue);
    assert_eq!(b.state(), State::CloseWait);
    assert_eq!(b.read(1), Ok(Some(vec![])));

    // 3
    deliver(&mut b, &mut a, now);
    assert_eq!(a.state(), State::FinWait2);

    // 4
    b.send_fin(now).unwrap();
    assert_eq!(b.state(), State::LastAck);
    let fin = b.take_outgoing().remove(0);
    assert_eq!(a.segment_arrives(fin, now), Arrival::TimeWait);

    // 5
    let ack = a.take_outgoing().remove(0);
    assert_eq!(ack.header.ack, b.snd.nxt);
    assert_eq!(b.segment_arrives(ack, now), Arrival::Closed);
    assert_eq!(b.state(), State::Closed);

    assert_eq!(a.time_out(), Ok(()));
    assert_eq!(a.state(), State::Closed);
}

#[test]
fn simultaneous_close() {
    let now = Instant::now();
    let (mut a, mut b) = established(now);
    a.send_fin(now).unwrap();
    b.send_fin(now).unwrap();
    let a_fin = a.take_outgoing().remove(0);
    let b_fin = b.take_outgoing().remove(0);

    assert_eq!(a.segment_arrives(b_fin, now), Arrival::Continue);
    assert_eq!(a.state(), State::Closing);
    assert_eq!(b.segment_arrives(a_fin, now), Arrival::Continue);
    assert_eq!(b.state(), State::Closing);

    let a_ack = a.take_outgoing().remove(0);
    let b_ack = b.take_outgoing().remove(0);
    assert_eq!(a.segment_arrives(b_ack, now), Arrival::TimeWait);
    assert_eq!(b.segment_arrives(a_ack, now), Arrival::TimeWait);
}

#[test]
fn lost_fin_is_retransmitted() {
    let now = Instant::now();
    let (mut a, _b) = established(now);
    a.send_fin(now).unwrap();
    let fin = a.take_outgoing().remove(0);
    let deadline = a.next_deadline().unwrap();
    a.poll_send(deadline);
    assert_eq!(a.take_outgoing(), [fin]);
}

#[test]
fn operations_check_the_state() {
    let now = Instant::now();
    let mut tcb = Tcb::new(PEER_A);
    assert_eq!(tcb.write(b"x"), Err(SocketError::NotConnected));
    assert_eq!(tcb.read(1), Err(SocketError::ConnectionReset));
    assert_eq!(tcb.send_fin(now), Err(SocketError::NotSupported));
    tcb.listen().unwrap();
    assert_eq!(tcb.listen(), Err(SocketError::AlreadyOpen));
    assert_eq!(tcb.read(1), Err(SocketError::NotSupported));
    tcb.close().unwrap();
    assert_eq!(tcb.state(), State::Closed);

    let (mut a, _b) = established(now);
    a.shut_read();
    assert_eq!(a.read(1), Err(SocketError::NotPermitted));
    a.send_fin(now).unwrap();
    assert_eq!(a.write(b"late"), Err(SocketError::NotConnected));
}

#[test]
fn full_send_buffer_would_block() {
    let now = Instant::now();
    let (mut a, _b) = established(now);
    let data = vec![0; SEND_BUFFER + 10];
    assert_eq!(a.write(&data), Ok(SEND_BUFFER));
    assert_eq!(a.write(&data), Err(SocketError::WouldBlock));
}
