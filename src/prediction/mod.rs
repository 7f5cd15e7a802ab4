//! Client-side prediction and reconciliation: record every input the local
//! player issues, apply it immediately, and replay from the last
//! server-confirmed state whenever the server's authoritative result
//! disagrees with what was predicted.

pub mod interpolation;

use std::collections::VecDeque;

use crate::ids::{Entity, Tick};

#[derive(Clone, Debug)]
pub struct InputRecord<I> {
    pub tick: Tick,
    pub input: I,
}

/// Bounded history of locally-issued inputs for one predicted entity, kept
/// so a reconciliation can replay everything after the last acknowledged
/// tick.
pub struct InputBuffer<I> {
    capacity: usize,
    records: VecDeque<InputRecord<I>>,
}

impl<I: Clone> InputBuffer<I> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, tick: Tick, input: I) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(InputRecord { tick, input });
    }

    /// Every input strictly after `ack_tick`, in tick order, for replay.
    pub fn since(&self, ack_tick: Tick) -> Vec<InputRecord<I>> {
        self.records
            .iter()
            .filter(|record| record.tick.is_after(ack_tick))
            .cloned()
            .collect()
    }

    pub fn drop_up_to(&mut self, ack_tick: Tick) {
        while let Some(front) = self.records.front() {
            if ack_tick.is_after(front.tick) || ack_tick == front.tick {
                self.records.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Whether a reconciliation can be satisfied by replaying recorded inputs,
/// or whether the divergence is severe enough to require a hard resync
/// (teleport to server state, discard prediction history).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconciliationOutcome {
    NoCorrectionNeeded,
    Replayed,
    HardResync,
}

pub struct PredictionManager<I> {
    inputs: InputBuffer<I>,
    last_acked_tick: Option<Tick>,
    oldest_prediction_tick: Option<Tick>,
    /// Divergence at or below this (host-defined distance units, squared)
    /// means the prediction already matches; above it, a rollback+replay is
    /// required.
    rollback_threshold_sq: f32,
    max_prediction_frames: u32,
}

impl<I: Clone> PredictionManager<I> {
    pub fn new(input_capacity: usize, rollback_threshold: f32) -> Self {
        Self::with_window(input_capacity, rollback_threshold, 10)
    }

    pub fn with_window(input_capacity: usize, rollback_threshold: f32, max_prediction_frames: u32) -> Self {
        Self {
            inputs: InputBuffer::new(input_capacity),
            last_acked_tick: None,
            oldest_prediction_tick: None,
            rollback_threshold_sq: rollback_threshold * rollback_threshold,
            max_prediction_frames,
        }
    }

    pub fn record_input(&mut self, tick: Tick, input: I) {
        self.inputs.push(tick, input);
        // Predictions older than `max_prediction_frames` are discarded; they
        // cannot usefully be replayed against any server tick that will
        // still arrive.
        let window_floor = tick.wrapping_sub(self.max_prediction_frames);
        self.inputs.drop_up_to(window_floor);
        self.oldest_prediction_tick = self.inputs.since(window_floor).first().map(|r| r.tick);
    }

    /// Decide what the reconciliation needs to do given the squared
    /// distance between the predicted and server-authoritative state at
    /// `server_tick`, and return the inputs to replay if any.
    ///
    /// Two independent thresholds apply: `rollback_threshold` (a magnitude
    /// check) decides whether a replay is needed at all; a hard resync is
    /// instead triggered whenever `server_tick` references state older than
    /// the oldest prediction still retained — by then there is nothing left
    /// to replay against, regardless of how small the divergence is.
    pub fn reconcile(
        &mut self,
        server_tick: Tick,
        predicted_vs_server_distance_sq: f32,
    ) -> (ReconciliationOutcome, Vec<InputRecord<I>>) {
        // The oldest prediction still in the ring is newer than the tick the
        // server is confirming: nothing is left to replay against, so there
        // is no option but a full resync.
        let window_exceeded = self
            .oldest_prediction_tick
            .is_some_and(|oldest| oldest.is_after(server_tick));

        self.last_acked_tick = Some(server_tick);
        self.inputs.drop_up_to(server_tick);
        self.oldest_prediction_tick = self.inputs.since(server_tick).first().map(|r| r.tick);

        if window_exceeded {
            return (ReconciliationOutcome::HardResync, Vec::new());
        }
        if predicted_vs_server_distance_sq <= self.rollback_threshold_sq {
            return (ReconciliationOutcome::NoCorrectionNeeded, Vec::new());
        }
        let replay = self.inputs.since(server_tick);
        (ReconciliationOutcome::Replayed, replay)
    }

    pub fn last_acked_tick(&self) -> Option<Tick> {
        self.last_acked_tick
    }
}

/// A predicted entity's local identity, for layers that need to look it up
/// without depending on the replication module directly.
#[derive(Clone, Copy, Debug)]
pub struct PredictedEntity {
    pub local_entity: Entity,
    pub owning_tick: Tick,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divergence_above_rollback_threshold_replays_inputs() {
        let mut manager = PredictionManager::<u8>::new(16, 0.5);
        manager.record_input(Tick(1), 1);
        manager.record_input(Tick(2), 2);
        manager.record_input(Tick(3), 3);

        let (outcome, replay) = manager.reconcile(Tick(1), 1.0);
        assert_eq!(outcome, ReconciliationOutcome::Replayed);
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].tick, Tick(2));
    }

    #[test]
    fn divergence_below_rollback_threshold_needs_no_correction() {
        let mut manager = PredictionManager::<u8>::new(16, 10.0);
        manager.record_input(Tick(1), 1);
        let (outcome, replay) = manager.reconcile(Tick(1), 1.0);
        assert_eq!(outcome, ReconciliationOutcome::NoCorrectionNeeded);
        assert!(replay.is_empty());
    }

    #[test]
    fn server_tick_older_than_oldest_prediction_forces_hard_resync() {
        let mut manager = PredictionManager::<u8>::new(16, 1.0);
        manager.record_input(Tick(5), 1);
        // server is confirming a tick from before anything we've predicted;
        // there is nothing left in the ring to replay against.
        let (outcome, replay) = manager.reconcile(Tick(0), 0.0);
        assert_eq!(outcome, ReconciliationOutcome::HardResync);
        assert!(replay.is_empty());
    }

    #[test]
    fn exact_match_needs_no_correction() {
        let mut manager = PredictionManager::<u8>::new(16, 10.0);
        let (outcome, _) = manager.reconcile(Tick(0), 0.0);
        assert_eq!(outcome, ReconciliationOutcome::NoCorrectionNeeded);
    }
}
