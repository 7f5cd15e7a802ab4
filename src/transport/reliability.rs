//! Per-direction sliding-window reliability: sequencing,
//! acknowledgment, retransmission, and AIMD flow control. One
//! [`ReliabilityState`] exists per connection; it is only ever touched by
//! that connection's worker.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::{ReliabilityError, Result};
use crate::transport::header::PacketFlags;
use crate::utils::rtt::RttEstimator;

pub const ACK_BITFIELD_BITS: u32 = 32;
pub const DEFAULT_MAX_RETRANSMITS: u32 = 10;

/// A packet handed to the reliability layer with `RELIABLE` set. Kept around
/// until acked so it can be retransmitted under a fresh sequence number.
#[derive(Debug, Clone)]
struct UnackedPacket {
    channel: u8,
    flags: PacketFlags,
    payload: Bytes,
    sent_at: Instant,
    retransmit_count: u32,
}

/// Tracks which of the last `ACK_BITFIELD_BITS` sequences before `highest`
/// have been received, for building the outbound ack/ack_bitfield pair.
#[derive(Debug, Default)]
struct ReceiveWindow {
    highest: Option<u32>,
    bitfield: u32,
}

impl ReceiveWindow {
    /// Record that `sequence` was received. Returns `true` if this is a
    /// sequence we have not seen before (i.e. not a duplicate to be dropped).
    fn record(&mut self, sequence: u32) -> bool {
        match self.highest {
            None => {
                self.highest = Some(sequence);
                self.bitfield = 0;
                true
            }
            Some(highest) => {
                let diff = crate::ids::wrapping_diff_u32(highest, sequence);
                if diff == 0 {
                    false
                } else if diff > 0 {
                    // sequence is newer than highest; shift the window forward.
                    let shift = diff as u32;
                    self.bitfield = if shift >= ACK_BITFIELD_BITS {
                        0
                    } else {
                        (self.bitfield << shift) | (1 << (shift - 1))
                    };
                    self.highest = Some(sequence);
                    true
                } else {
                    // sequence is older than highest: mark its bit if in range.
                    let back = (-diff) as u32;
                    if back == 0 || back > ACK_BITFIELD_BITS {
                        return back != 0; // treat "too old" as non-duplicate but unactionable
                    }
                    let bit = 1 << (back - 1);
                    let was_set = self.bitfield & bit != 0;
                    self.bitfield |= bit;
                    !was_set
                }
            }
        }
    }

    fn ack_fields(&self) -> (u32, u32) {
        (self.highest.unwrap_or(0), self.bitfield)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CongestionWindow {
    cwnd: f32,
    min_cwnd: f32,
    max_cwnd: f32,
}

impl CongestionWindow {
    pub fn new(initial: f32, min: f32, max: f32) -> Self {
        Self {
            cwnd: initial,
            min_cwnd: min,
            max_cwnd: max,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cwnd as usize
    }

    fn on_ack(&mut self) {
        // additive increase, one packet-worth of credit per successful ack cycle
        self.cwnd = (self.cwnd + 1.0 / self.cwnd).min(self.max_cwnd);
    }

    fn on_loss(&mut self) {
        self.cwnd = (self.cwnd / 2.0).max(self.min_cwnd);
    }
}

impl Default for CongestionWindow {
    fn default() -> Self {
        Self::new(4.0, 1.0, 256.0)
    }
}

pub struct ReliabilityState {
    pub connection_id: u32,
    next_sequence: u32,
    unacked: HashMap<u32, UnackedPacket>,
    /// Maps a retransmitted packet's new sequence back to the sequence that
    /// originated it, so an ack for either sequence retires the same logical
    /// send.
    retransmit_alias: HashMap<u32, u32>,
    recv_window: ReceiveWindow,
    rtt: RttEstimator,
    cwnd: CongestionWindow,
    max_retransmits: u32,
}

impl ReliabilityState {
    pub fn new(connection_id: u32, min_rto: Duration, max_retransmits: u32) -> Self {
        Self {
            connection_id,
            next_sequence: 0,
            unacked: HashMap::new(),
            retransmit_alias: HashMap::new(),
            recv_window: ReceiveWindow::default(),
            rtt: RttEstimator::new(min_rto),
            cwnd: CongestionWindow::default(),
            max_retransmits,
        }
    }

    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }

    pub fn can_send_more(&self) -> bool {
        self.unacked_count() < self.cwnd.capacity()
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.rtt.smoothed_rtt()
    }

    /// Assign the next sequence number and, if `RELIABLE`, start tracking the
    /// packet until it is acked.
    pub fn next_send(&mut self, channel: u8, flags: PacketFlags, payload: Bytes, now: Instant) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        if flags.contains(PacketFlags::RELIABLE) {
            self.unacked.insert(
                sequence,
                UnackedPacket {
                    channel,
                    flags,
                    payload,
                    sent_at: now,
                    retransmit_count: 0,
                },
            );
        }
        sequence
    }

    /// The `(ack, ack_bitfield)` pair to stamp onto the next outbound header.
    pub fn ack_fields(&self) -> (u32, u32) {
        self.recv_window.ack_fields()
    }

    /// Process an inbound header: update the receive window and retire any
    /// of our own unacked sends the peer has just confirmed. Returns `false`
    /// if `sequence` is a duplicate that should be dropped silently.
    pub fn on_receive(&mut self, sequence: u32, ack: u32, ack_bitfield: u32, now: Instant) -> bool {
        let is_new = self.recv_window.record(sequence);
        self.apply_acks(ack, ack_bitfield, now);
        is_new
    }

    fn apply_acks(&mut self, ack: u32, ack_bitfield: u32, now: Instant) {
        self.retire_if_acked(ack, now);
        for bit in 0..ACK_BITFIELD_BITS {
            if ack_bitfield & (1 << bit) != 0 {
                let seq = ack.wrapping_sub(bit + 1);
                self.retire_if_acked(seq, now);
            }
        }
    }

    fn retire_if_acked(&mut self, acked_sequence: u32, now: Instant) {
        // an ack may reference either the original sequence or a retransmit alias
        let original = self
            .retransmit_alias
            .remove(&acked_sequence)
            .unwrap_or(acked_sequence);
        if let Some(packet) = self.unacked.remove(&original) {
            self.rtt.sample(now.duration_since(packet.sent_at));
            self.cwnd.on_ack();
        }
    }

    /// Scan for unacked packets whose retransmission timeout has elapsed.
    /// Returns the newly-assigned `(new_sequence, channel, flags, payload)`
    /// for each one to actually retransmit on the wire.
    pub fn collect_retransmits(&mut self, now: Instant) -> Result<Vec<(u32, u8, PacketFlags, Bytes)>> {
        let rto = self.rtt.rto();
        let expired: Vec<u32> = self
            .unacked
            .iter()
            .filter(|(_, p)| now.duration_since(p.sent_at) >= rto)
            .map(|(seq, _)| *seq)
            .collect();

        let mut out = Vec::with_capacity(expired.len());
        for old_seq in expired {
            let mut packet = self.unacked.remove(&old_seq).expect("scanned key present");
            packet.retransmit_count += 1;
            if packet.retransmit_count > self.max_retransmits {
                return Err(ReliabilityError::RetransmitCeilingExceeded.into());
            }
            self.cwnd.on_loss();
            let new_seq = self.next_sequence;
            self.next_sequence = self.next_sequence.wrapping_add(1);
            self.retransmit_alias.insert(new_seq, old_seq);
            let resend = (new_seq, packet.channel, packet.flags, packet.payload.clone());
            packet.sent_at = now;
            self.unacked.insert(old_seq, packet);
            out.push(resend);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_sequence_is_detected() {
        let mut state = ReliabilityState::new(1, Duration::from_millis(50), 10);
        let now = Instant::now();
        assert!(state.on_receive(5, 0, 0, now));
        assert!(!state.on_receive(5, 0, 0, now));
        assert!(state.on_receive(6, 0, 0, now));
    }

    #[test]
    fn ack_retires_unacked_packet_and_grows_cwnd() {
        let mut state = ReliabilityState::new(1, Duration::from_millis(10), 10);
        let now = Instant::now();
        let seq = state.next_send(0, PacketFlags::RELIABLE, Bytes::from_static(b"x"), now);
        assert_eq!(state.unacked_count(), 1);
        state.on_receive(0, seq, 0, now + Duration::from_millis(5));
        assert_eq!(state.unacked_count(), 0);
    }

    #[test]
    fn retransmit_ceiling_disconnects() {
        let mut state = ReliabilityState::new(1, Duration::from_millis(1), 2);
        let now = Instant::now();
        state.next_send(0, PacketFlags::RELIABLE, Bytes::from_static(b"x"), now);
        let mut t = now;
        for _ in 0..2 {
            t += Duration::from_millis(10);
            state.collect_retransmits(t).unwrap();
        }
        t += Duration::from_millis(10);
        assert!(state.collect_retransmits(t).is_err());
    }

    #[test]
    fn ack_for_retransmit_alias_retires_original() {
        let mut state = ReliabilityState::new(1, Duration::from_millis(1), 10);
        let now = Instant::now();
        state.next_send(0, PacketFlags::RELIABLE, Bytes::from_static(b"x"), now);
        let later = now + Duration::from_millis(10);
        let resent = state.collect_retransmits(later).unwrap();
        assert_eq!(resent.len(), 1);
        let (new_seq, ..) = resent[0];
        state.on_receive(0, new_seq, 0, later + Duration::from_millis(1));
        assert_eq!(state.unacked_count(), 0);
    }
}
