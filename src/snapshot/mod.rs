//! World snapshots: the per-tick, per-entity component state an
//! authoritative peer hands to the replication engine, and the bounded
//! history of them kept per remote peer so delta updates can reference an
//! older baseline.

pub mod delta;

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{Result, ResourceError};
use crate::ids::{ComponentTypeId, ComponentVersion, NetworkEntityId, Tick};

#[derive(Clone, Debug)]
pub struct ComponentSnapshot {
    pub version: ComponentVersion,
    pub data: Bytes,
}

#[derive(Clone, Debug, Default)]
pub struct EntitySnapshot {
    pub components: HashMap<ComponentTypeId, ComponentSnapshot>,
}

#[derive(Clone, Debug, Default)]
pub struct WorldSnapshot {
    pub tick: Tick,
    pub entities: HashMap<NetworkEntityId, EntitySnapshot>,
}

impl WorldSnapshot {
    pub fn new(tick: Tick) -> Self {
        Self {
            tick,
            entities: HashMap::new(),
        }
    }
}

/// Ring of the last `capacity` [`WorldSnapshot`]s for one remote peer, used
/// to compute deltas against whatever baseline that peer last acknowledged.
pub struct SnapshotHistory {
    capacity: usize,
    snapshots: std::collections::VecDeque<WorldSnapshot>,
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            snapshots: std::collections::VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, snapshot: WorldSnapshot) {
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn get(&self, tick: Tick) -> Result<&WorldSnapshot> {
        self.snapshots
            .iter()
            .find(|s| s.tick == tick)
            .ok_or(ResourceError::SnapshotHistoryExhausted { tick: tick.0 }.into())
    }

    pub fn latest(&self) -> Option<&WorldSnapshot> {
        self.snapshots.back()
    }

    pub fn oldest_tick(&self) -> Option<Tick> {
        self.snapshots.front().map(|s| s.tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_evicts_oldest_beyond_capacity() {
        let mut history = SnapshotHistory::new(2);
        history.push(WorldSnapshot::new(Tick(1)));
        history.push(WorldSnapshot::new(Tick(2)));
        history.push(WorldSnapshot::new(Tick(3)));
        assert!(history.get(Tick(1)).is_err());
        assert!(history.get(Tick(2)).is_ok());
        assert_eq!(history.oldest_tick(), Some(Tick(2)));
    }
}
