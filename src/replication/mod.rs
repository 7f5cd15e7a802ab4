//! Replication engine: drives per-tick snapshot capture on the authoritative
//! side, delta computation per observer, and application of inbound updates
//! on the receiving side, gated by interest management.

pub mod interest;

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::ids::{Entity, NetworkEntityId, PeerId, Tick};
use crate::protocol::message::{ComponentReplication, EntitySpawn};
use crate::registry::ComponentRegistry;
use crate::snapshot::delta::{apply_update, compute_delta, LastSent};
use crate::snapshot::{SnapshotHistory, WorldSnapshot};

pub use interest::InterestPolicy;

/// Per-entity bookkeeping the replication engine keeps on the authoritative
/// side: who currently owns it and the local<->network id mapping.
#[derive(Clone, Copy, Debug)]
pub struct EntityReplicationState {
    pub net_id: NetworkEntityId,
    pub local_entity: Entity,
    pub owner: PeerId,
}

/// Bidirectional mapping between [`NetworkEntityId`] and the host ECS's
/// local [`Entity`], shared by every layer that needs to translate between
/// wire identity and local identity.
#[derive(Default)]
pub struct EntityMap {
    to_local: HashMap<NetworkEntityId, Entity>,
    to_network: HashMap<Entity, NetworkEntityId>,
}

impl EntityMap {
    pub fn insert(&mut self, net_id: NetworkEntityId, local: Entity) {
        self.to_local.insert(net_id, local);
        self.to_network.insert(local, net_id);
    }

    pub fn remove_by_network(&mut self, net_id: NetworkEntityId) -> Option<Entity> {
        let local = self.to_local.remove(&net_id)?;
        self.to_network.remove(&local);
        Some(local)
    }

    pub fn local_of(&self, net_id: NetworkEntityId) -> Option<Entity> {
        self.to_local.get(&net_id).copied()
    }

    pub fn network_of(&self, local: Entity) -> Option<NetworkEntityId> {
        self.to_network.get(&local).copied()
    }

    /// Every network id currently mapped, for reconciling against an
    /// authoritative manifest (e.g. a full [`crate::protocol::message::StateSync`]).
    pub fn net_ids(&self) -> impl Iterator<Item = NetworkEntityId> + '_ {
        self.to_local.keys().copied()
    }
}

/// The authoritative side's per-tick replication pass: capture a
/// [`WorldSnapshot`], then for each observing peer compute and return the
/// [`ComponentReplication`] messages it needs, filtered by interest.
pub struct ReplicationEngine {
    history: HashMap<PeerId, SnapshotHistory>,
    acked_ticks: HashMap<PeerId, Tick>,
    last_sent: HashMap<PeerId, LastSent>,
    pending_full: HashMap<PeerId, HashSet<(NetworkEntityId, crate::ids::ComponentTypeId)>>,
    observed: HashMap<PeerId, HashSet<NetworkEntityId>>,
    history_capacity: usize,
    delta_max_fraction: f32,
}

/// Output of one tick's replication pass for a single observing peer: the
/// entities that just entered or left its interest set (needing a spawn or
/// despawn message ahead of/instead of component data) plus the component
/// deltas for everything still relevant.
#[derive(Default)]
pub struct ReplicationBatch {
    pub newly_relevant: Vec<NetworkEntityId>,
    pub no_longer_relevant: Vec<NetworkEntityId>,
    pub updates: Vec<ComponentReplication>,
}

impl ReplicationEngine {
    pub fn new(history_capacity: usize) -> Self {
        Self::with_delta_fraction(history_capacity, 0.9)
    }

    pub fn with_delta_fraction(history_capacity: usize, delta_max_fraction: f32) -> Self {
        Self {
            history: HashMap::new(),
            acked_ticks: HashMap::new(),
            last_sent: HashMap::new(),
            pending_full: HashMap::new(),
            observed: HashMap::new(),
            history_capacity,
            delta_max_fraction,
        }
    }

    /// Record that `peer` needs a full (not delta) resend of one component on
    /// one entity, e.g. because it reported `MissingDeltaBase` via a
    /// `SnapshotAck`. Consumed by the next `replicate_to_peer` call.
    pub fn request_full_resend(
        &mut self,
        peer: PeerId,
        net_id: NetworkEntityId,
        type_id: crate::ids::ComponentTypeId,
    ) {
        self.pending_full.entry(peer).or_default().insert((net_id, type_id));
    }

    fn history_for(&mut self, peer: PeerId) -> &mut SnapshotHistory {
        self.history
            .entry(peer)
            .or_insert_with(|| SnapshotHistory::new(self.history_capacity))
    }

    /// Record that `peer` has acknowledged up through `tick`, so the next
    /// `replicate_to_peer` call can use it as the delta baseline.
    pub fn ack(&mut self, peer: PeerId, tick: Tick) {
        self.acked_ticks.insert(peer, tick);
    }

    pub fn last_acked_tick(&self, peer: PeerId) -> Option<Tick> {
        self.acked_ticks.get(&peer).copied()
    }

    /// Compute and record the deltas one observing peer needs for `snapshot`,
    /// already filtered down to the entities `policy` says are relevant to
    /// it. `acked_tick` is the last tick the peer has acknowledged, used as
    /// the delta baseline; `None` forces a full snapshot.
    pub fn replicate_to_peer(
        &mut self,
        registry: &ComponentRegistry,
        peer: PeerId,
        policy: &dyn InterestPolicy,
        snapshot: &WorldSnapshot,
        acked_tick: Option<Tick>,
    ) -> Result<Vec<ComponentReplication>> {
        let filtered = policy.filter(peer, snapshot);
        let baseline = acked_tick.and_then(|tick| self.history_for(peer).get(tick).ok().cloned());
        let last_sent = self.last_sent.entry(peer).or_default();
        let forced_full = self.pending_full.remove(&peer).unwrap_or_default();
        let deltas = compute_delta(
            registry,
            baseline.as_ref(),
            &filtered,
            last_sent,
            self.delta_max_fraction,
            &forced_full,
        )?;
        self.history_for(peer).push(filtered);
        Ok(deltas)
    }

    /// Same as [`Self::replicate_to_peer`] but also diffs interest membership
    /// against what this peer was last known to observe, surfacing entities
    /// that just entered or left relevance so the caller can emit spawn and
    /// despawn messages around the component deltas.
    pub fn replicate_to_peer_with_membership(
        &mut self,
        registry: &ComponentRegistry,
        peer: PeerId,
        policy: &dyn InterestPolicy,
        snapshot: &WorldSnapshot,
        acked_tick: Option<Tick>,
    ) -> Result<ReplicationBatch> {
        let filtered = policy.filter(peer, snapshot);
        let current_ids: HashSet<NetworkEntityId> = filtered.entities.keys().copied().collect();
        let previously_observed = self.observed.entry(peer).or_default();
        let newly_relevant: Vec<_> = current_ids.difference(previously_observed).copied().collect();
        let no_longer_relevant: Vec<_> = previously_observed.difference(&current_ids).copied().collect();
        *previously_observed = current_ids;

        let baseline = acked_tick.and_then(|tick| self.history_for(peer).get(tick).ok().cloned());
        let last_sent = self.last_sent.entry(peer).or_default();
        let forced_full = self.pending_full.remove(&peer).unwrap_or_default();
        let updates = compute_delta(
            registry,
            baseline.as_ref(),
            &filtered,
            last_sent,
            self.delta_max_fraction,
            &forced_full,
        )?;
        self.history_for(peer).push(filtered);
        Ok(ReplicationBatch { newly_relevant, no_longer_relevant, updates })
    }

    /// Apply one inbound [`ComponentReplication`] to the local shadow state,
    /// returning the raw bytes to hand the host ECS per updated component.
    /// Returns `Err(ReplicationError::MissingDeltaBase)` when a delta arrives
    /// with no locally-held baseline to apply it against; the caller should
    /// treat this as a signal to request a full resync from the sender.
    pub fn apply_replication(
        &self,
        registry: &ComponentRegistry,
        current_raw: impl Fn(NetworkEntityId, crate::ids::ComponentTypeId) -> Option<Vec<u8>>,
        update: &ComponentReplication,
    ) -> Result<Vec<(crate::ids::ComponentTypeId, Vec<u8>)>> {
        update
            .updates
            .iter()
            .map(|component_update| {
                let existing = current_raw(update.net_id, component_update.type_id);
                let bytes = apply_update(registry, update.net_id, component_update, existing.as_deref())?;
                Ok((component_update.type_id, bytes))
            })
            .collect()
    }

    pub fn forget_peer(&mut self, peer: PeerId) {
        self.history.remove(&peer);
        self.acked_ticks.remove(&peer);
        self.last_sent.remove(&peer);
        self.pending_full.remove(&peer);
        self.observed.remove(&peer);
    }
}

/// Build the [`EntitySpawn`] message for an entity newly relevant to a peer.
pub fn spawn_message(state: &EntityReplicationState, tick: Tick) -> EntitySpawn {
    EntitySpawn {
        net_id: state.net_id,
        owner: state.owner,
        tick,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ReplicationFlags, ReplicationInfo};
    use crate::snapshot::{ComponentSnapshot, EntitySnapshot};
    use bytes::Bytes;

    fn identity_encode(bytes: &[u8]) -> Bytes {
        Bytes::copy_from_slice(bytes)
    }
    fn identity_decode(bytes: &Bytes) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register(ReplicationInfo {
            type_id: crate::ids::ComponentTypeId(1),
            name: "Position".into(),
            flags: ReplicationFlags::REPLICATED,
            update_period_ticks: 0,
            encode: identity_encode,
            decode: identity_decode,
            encode_delta: None,
            decode_delta: None,
        });
        registry
    }

    #[test]
    fn entity_map_roundtrips_both_directions() {
        let mut map = EntityMap::default();
        map.insert(NetworkEntityId(1), Entity::new(0, 0));
        assert_eq!(map.local_of(NetworkEntityId(1)), Some(Entity::new(0, 0)));
        assert_eq!(map.network_of(Entity::new(0, 0)), Some(NetworkEntityId(1)));
        map.remove_by_network(NetworkEntityId(1));
        assert_eq!(map.local_of(NetworkEntityId(1)), None);
    }

    #[test]
    fn replicate_to_peer_produces_full_snapshot_without_baseline() {
        let registry = registry();
        let mut engine = ReplicationEngine::new(8);
        let mut snapshot = WorldSnapshot::new(Tick(1));
        let mut entity = EntitySnapshot::default();
        entity.components.insert(
            crate::ids::ComponentTypeId(1),
            ComponentSnapshot {
                version: crate::ids::ComponentVersion(1),
                data: Bytes::from_static(b"x"),
            },
        );
        snapshot.entities.insert(NetworkEntityId(1), entity);

        let policy = interest::DefaultInterest;
        let deltas = engine
            .replicate_to_peer(&registry, PeerId(1), &policy, &snapshot, None)
            .unwrap();
        assert_eq!(deltas.len(), 1);
    }

    #[test]
    fn entity_map_net_ids_lists_every_mapped_entity() {
        let mut map = EntityMap::default();
        map.insert(NetworkEntityId(1), Entity::new(0, 0));
        map.insert(NetworkEntityId(2), Entity::new(1, 0));
        let mut ids: Vec<_> = map.net_ids().collect();
        ids.sort_by_key(|id| id.0);
        assert_eq!(ids, vec![NetworkEntityId(1), NetworkEntityId(2)]);
    }

    #[test]
    fn requested_full_resend_is_honored_once() {
        let registry = registry();
        let mut engine = ReplicationEngine::new(8);
        let mut snapshot = WorldSnapshot::new(Tick(1));
        let mut entity = EntitySnapshot::default();
        entity.components.insert(
            crate::ids::ComponentTypeId(1),
            ComponentSnapshot {
                version: crate::ids::ComponentVersion(1),
                data: Bytes::from_static(b"x"),
            },
        );
        snapshot.entities.insert(NetworkEntityId(1), entity);
        engine.request_full_resend(PeerId(1), NetworkEntityId(1), crate::ids::ComponentTypeId(1));

        let policy = interest::DefaultInterest;
        let deltas = engine
            .replicate_to_peer(&registry, PeerId(1), &policy, &snapshot, None)
            .unwrap();
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].updates[0].base_version.is_none());
    }

    #[test]
    fn membership_diff_reports_newly_and_no_longer_relevant_entities() {
        let registry = registry();
        let mut engine = ReplicationEngine::new(8);
        let policy = interest::DefaultInterest;

        let mut first = WorldSnapshot::new(Tick(1));
        first.entities.insert(NetworkEntityId(1), EntitySnapshot::default());
        let batch = engine
            .replicate_to_peer_with_membership(&registry, PeerId(1), &policy, &first, None)
            .unwrap();
        assert_eq!(batch.newly_relevant, vec![NetworkEntityId(1)]);
        assert!(batch.no_longer_relevant.is_empty());

        let second = WorldSnapshot::new(Tick(2));
        let batch = engine
            .replicate_to_peer_with_membership(&registry, PeerId(1), &policy, &second, None)
            .unwrap();
        assert!(batch.newly_relevant.is_empty());
        assert_eq!(batch.no_longer_relevant, vec![NetworkEntityId(1)]);
    }
}
