//! Retransmission timeout estimation in the manner of Jacobson and Karn.
//!
//! One segment at a time is timed. Its sample counts only when the ACK
//! that arrives is exactly the one the segment asked for, so a
//! retransmitted segment never contributes an ambiguous sample.

use super::modular_cmp::mod_lt;
use std::time::Duration;
use tokio::time::Instant;

pub const INITIAL_RTO: Duration = Duration::from_secs(3);
/// The smallest variance term added to the smoothed round trip.
pub const MIN_RTO_VARIANCE: Duration = Duration::from_micros(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rto {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    /// The ACK number that ends the timed segment, and when it left.
    probe: Option<(u32, Instant)>,
}

impl Rto {
    pub fn new() -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: INITIAL_RTO,
            probe: None,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// Starts timing a segment unless one is already being timed.
    pub fn probe(&mut self, expected_ack: u32, now: Instant) {
        if self.probe.is_none() {
            self.probe = Some((expected_ack, now));
        }
    }

    /// Forgets the timed segment. Called on retransmission.
    pub fn clear_probe(&mut self) {
        self.probe = None;
    }

    /// Feeds an acknowledgment number that arrived at `now`.
    pub fn on_ack(&mut self, ack: u32, now: Instant) {
        let Some((expected, sent)) = self.probe else {
            return;
        };
        if ack == expected {
            self.sample(now.saturating_duration_since(sent));
            self.probe = None;
        } else if mod_lt(expected, ack) {
            self.probe = None;
        }
    }

    fn sample(&mut self, r: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(r);
                self.rttvar = r / 2;
            }
            Some(srtt) => {
                let error = if srtt > r { srtt - r } else { r - srtt };
                self.rttvar = self.rttvar * 3 / 4 + error / 4;
                self.srtt = Some(srtt * 7 / 8 + r / 8);
            }
        }
        let srtt = self.srtt.unwrap_or(r);
        self.rto = srtt + (self.rttvar * 4).max(MIN_RTO_VARIANCE);
    }
}

impl Default for Rto {
    fn default() -> Self {
        Self::new()
    }
}
