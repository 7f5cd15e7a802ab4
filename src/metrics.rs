//! Counters describing one [`crate::peer::Peer`]'s live traffic. Every
//! counter is mirrored to the global `metrics` facade (so a host that's
//! installed a recorder gets Prometheus/StatsD export for free) and kept in
//! an in-process snapshot behind a [`parking_lot::RwLock`] for a host with
//! no recorder installed to poll directly.

use parking_lot::RwLock;

#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsSnapshot {
    pub entities_spawned: u64,
    pub entities_despawned: u64,
    pub components_replicated: u64,
    pub full_snapshots_received: u64,
    pub delta_snapshots_received: u64,
    pub resync_requests: u64,
    pub authority_violations: u64,
    pub prediction_rollbacks: u64,
}

#[derive(Default)]
pub struct Metrics {
    snapshot: RwLock<MetricsSnapshot>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.snapshot.read()
    }

    pub fn record_entity_spawn(&self) {
        self.snapshot.write().entities_spawned += 1;
        #[cfg(feature = "metrics")]
        metrics::counter!("replicore::entity_spawn").increment(1);
    }

    pub fn record_entity_despawn(&self) {
        self.snapshot.write().entities_despawned += 1;
        #[cfg(feature = "metrics")]
        metrics::counter!("replicore::entity_despawn").increment(1);
    }

    pub fn record_components_replicated(&self, count: u64) {
        self.snapshot.write().components_replicated += count;
        #[cfg(feature = "metrics")]
        metrics::counter!("replicore::component_replication").increment(count);
    }

    pub fn record_full_snapshot_received(&self) {
        self.snapshot.write().full_snapshots_received += 1;
        #[cfg(feature = "metrics")]
        metrics::counter!("replicore::state_sync::full").increment(1);
    }

    pub fn record_delta_snapshot_received(&self) {
        self.snapshot.write().delta_snapshots_received += 1;
        #[cfg(feature = "metrics")]
        metrics::counter!("replicore::state_sync::delta").increment(1);
    }

    pub fn record_resync_request(&self) {
        self.snapshot.write().resync_requests += 1;
        #[cfg(feature = "metrics")]
        metrics::counter!("replicore::resync_request").increment(1);
    }

    pub fn record_authority_violation(&self) {
        self.snapshot.write().authority_violations += 1;
        #[cfg(feature = "metrics")]
        metrics::counter!("replicore::authority_violation").increment(1);
    }

    pub fn record_prediction_rollback(&self) {
        self.snapshot.write().prediction_rollbacks += 1;
        #[cfg(feature = "metrics")]
        metrics::counter!("replicore::prediction_rollback").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let metrics = Metrics::new();
        metrics.record_entity_spawn();
        metrics.record_entity_spawn();
        metrics.record_authority_violation();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.entities_spawned, 2);
        assert_eq!(snapshot.authority_violations, 1);
        assert_eq!(snapshot.entities_despawned, 0);
    }
}
