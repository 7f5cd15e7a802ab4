//! Delta computation: for each entity/component pair that changed since the
//! peer's last acknowledged snapshot, emit either a full encode or, when the
//! registry supports it, a delta against that baseline.

use std::collections::{HashMap, HashSet};

use crate::error::{ReplicationError, Result};
use crate::ids::{ComponentTypeId, NetworkEntityId, Tick};
use crate::protocol::message::{ComponentReplication, ComponentUpdate};
use crate::registry::ComponentRegistry;

use super::{EntitySnapshot, WorldSnapshot};

/// Per-(entity, component) tick of the last update actually sent to one
/// observing peer, used to gate `update_period_ticks`. Keyed separately from
/// the acked-baseline tick: an update period throttles *send frequency*, the
/// baseline is about *delta correctness*.
pub type LastSent = HashMap<(NetworkEntityId, ComponentTypeId), Tick>;

/// Compute the [`ComponentReplication`] messages needed to bring a peer that
/// last acknowledged `baseline` (or never acknowledged anything) up to
/// `current`. One message is produced per entity that has any change.
/// `last_sent` is this peer's per-component send-cadence bookkeeping, updated
/// in place; `delta_max_fraction` bounds how large a delta may be relative to
/// the full encoding before falling back to sending the full encoding.
/// `forced_full` names (entity, component) pairs that must be sent as a full
/// encode this call regardless of cadence or baseline, e.g. because the peer
/// signalled a `MissingDeltaBase` recovery request for them.
pub fn compute_delta(
    registry: &ComponentRegistry,
    baseline: Option<&WorldSnapshot>,
    current: &WorldSnapshot,
    last_sent: &mut LastSent,
    delta_max_fraction: f32,
    forced_full: &HashSet<(NetworkEntityId, ComponentTypeId)>,
) -> Result<Vec<ComponentReplication>> {
    let mut out = Vec::new();
    for (net_id, entity) in &current.entities {
        let baseline_entity = baseline.and_then(|b| b.entities.get(net_id));
        let removed = removed_components(baseline_entity, entity);
        let updates = changed_components(
            registry,
            baseline_entity,
            entity,
            *net_id,
            current.tick,
            last_sent,
            delta_max_fraction,
            forced_full,
        )?;
        if updates.is_empty() && removed.is_empty() {
            continue;
        }
        out.push(ComponentReplication {
            net_id: *net_id,
            tick: current.tick,
            updates,
            removed,
        });
    }
    Ok(out)
}

fn removed_components(
    baseline: Option<&EntitySnapshot>,
    current: &EntitySnapshot,
) -> Vec<ComponentTypeId> {
    let Some(baseline) = baseline else {
        return Vec::new();
    };
    baseline
        .components
        .keys()
        .filter(|type_id| !current.components.contains_key(*type_id))
        .copied()
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn changed_components(
    registry: &ComponentRegistry,
    baseline: Option<&EntitySnapshot>,
    current: &EntitySnapshot,
    net_id: NetworkEntityId,
    tick: Tick,
    last_sent: &mut LastSent,
    delta_max_fraction: f32,
    forced_full: &HashSet<(NetworkEntityId, ComponentTypeId)>,
) -> Result<Vec<ComponentUpdate>> {
    let mut updates = Vec::new();
    for (type_id, snapshot) in &current.components {
        let key = (net_id, *type_id);
        let forced = forced_full.contains(&key);
        let prior = baseline.and_then(|b| b.components.get(type_id));
        if let Some(prior) = prior {
            if prior.version == snapshot.version && !forced {
                continue;
            }
        }
        let info = registry.get(*type_id)?;
        if info.update_period_ticks > 0 && !forced {
            if let Some(&sent_tick) = last_sent.get(&key) {
                let elapsed = (tick - sent_tick) as u32;
                if elapsed < info.update_period_ticks {
                    continue;
                }
            }
        }

        let full = (info.encode)(&snapshot.data);
        let update = if forced {
            ComponentUpdate {
                type_id: *type_id,
                version: snapshot.version,
                base_version: None,
                data: full,
            }
        } else if let (Some(prior), true) = (prior, info.supports_delta()) {
            let encode_delta = info.encode_delta.expect("supports_delta implies Some");
            let delta = encode_delta(&prior.data, &snapshot.data);
            // Only worth sending if meaningfully smaller than the full
            // encoding; otherwise the baseline dependency isn't worth it.
            if (delta.len() as f32) < (full.len() as f32) * delta_max_fraction {
                ComponentUpdate {
                    type_id: *type_id,
                    version: snapshot.version,
                    base_version: Some(prior.version),
                    data: delta,
                }
            } else {
                ComponentUpdate {
                    type_id: *type_id,
                    version: snapshot.version,
                    base_version: None,
                    data: full,
                }
            }
        } else {
            ComponentUpdate {
                type_id: *type_id,
                version: snapshot.version,
                base_version: None,
                data: full,
            }
        };
        last_sent.insert(key, tick);
        updates.push(update);
    }
    Ok(updates)
}

/// Apply one inbound [`ComponentUpdate`] against the receiver's current raw
/// bytes for that component (`None` if the component doesn't exist locally
/// yet), returning the new raw bytes to store.
pub fn apply_update(
    registry: &ComponentRegistry,
    net_id: NetworkEntityId,
    update: &ComponentUpdate,
    current_raw: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let info = registry.get(update.type_id)?;
    match (update.base_version, current_raw) {
        (Some(_), Some(raw)) => {
            let decode_delta = info
                .decode_delta
                .ok_or(ReplicationError::UnknownComponentType(update.type_id))?;
            decode_delta(raw, &update.data)
        }
        (Some(base_version), None) => Err(ReplicationError::MissingDeltaBase {
            net_id,
            type_id: update.type_id,
            base_tick: base_version.0,
        }
        .into()),
        (None, _) => (info.decode)(&update.data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ComponentVersion;
    use crate::registry::{ReplicationFlags, ReplicationInfo};
    use bytes::Bytes;
    use std::collections::HashMap;

    fn identity_encode(bytes: &[u8]) -> Bytes {
        Bytes::copy_from_slice(bytes)
    }

    fn identity_decode(bytes: &Bytes) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry.register(ReplicationInfo {
            type_id: ComponentTypeId(1),
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
    fn new_entity_produces_full_update() {
        let registry = registry();
        let mut current = WorldSnapshot::new(Tick(1));
        let mut entity = EntitySnapshot::default();
        entity.components.insert(
            ComponentTypeId(1),
            super::super::ComponentSnapshot {
                version: ComponentVersion(1),
                data: Bytes::from_static(b"pos"),
            },
        );
        current.entities.insert(NetworkEntityId(1), entity);

        let mut last_sent = LastSent::new();
        let deltas = compute_delta(&registry, None, &current, &mut last_sent, 0.9, &HashSet::new()).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].updates.len(), 1);
        assert!(deltas[0].updates[0].base_version.is_none());
    }

    #[test]
    fn unchanged_version_produces_no_update() {
        let registry = registry();
        let mut snapshot = WorldSnapshot::new(Tick(1));
        let mut entity = EntitySnapshot::default();
        entity.components.insert(
            ComponentTypeId(1),
            super::super::ComponentSnapshot {
                version: ComponentVersion(1),
                data: Bytes::from_static(b"pos"),
            },
        );
        snapshot.entities.insert(NetworkEntityId(1), entity);
        let map: HashMap<_, _> = snapshot.entities.clone().into_iter().collect();
        let baseline = WorldSnapshot {
            tick: Tick(0),
            entities: map,
        };

        let mut last_sent = LastSent::new();
        let deltas = compute_delta(&registry, Some(&baseline), &snapshot, &mut last_sent, 0.9, &HashSet::new()).unwrap();
        assert!(deltas.is_empty());
    }

    #[test]
    fn update_period_suppresses_resend_before_period_elapses() {
        let mut registry = ComponentRegistry::new();
        registry.register(ReplicationInfo {
            type_id: ComponentTypeId(1),
            name: "Position".into(),
            flags: ReplicationFlags::REPLICATED,
            update_period_ticks: 4,
            encode: identity_encode,
            decode: identity_decode,
            encode_delta: None,
            decode_delta: None,
        });

        let mut last_sent = LastSent::new();
        last_sent.insert((NetworkEntityId(1), ComponentTypeId(1)), Tick(10));

        let mut current = WorldSnapshot::new(Tick(12));
        let mut entity = EntitySnapshot::default();
        entity.components.insert(
            ComponentTypeId(1),
            super::super::ComponentSnapshot {
                version: ComponentVersion(2),
                data: Bytes::from_static(b"pos"),
            },
        );
        current.entities.insert(NetworkEntityId(1), entity);

        let deltas = compute_delta(&registry, None, &current, &mut last_sent, 0.9, &HashSet::new()).unwrap();
        assert!(deltas.is_empty(), "2 ticks elapsed, period is 4");
    }

    #[test]
    fn large_delta_falls_back_to_full_encoding() {
        fn shrinking_delta(_prior: &Bytes, _current: &Bytes) -> Bytes {
            Bytes::from_static(b"this delta is longer than the full payload")
        }
        fn noop_decode_delta(_prior: &[u8], _delta: &Bytes) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        let mut registry = ComponentRegistry::new();
        registry.register(ReplicationInfo {
            type_id: ComponentTypeId(1),
            name: "Position".into(),
            flags: ReplicationFlags::REPLICATED | ReplicationFlags::DELTA_COMPRESSED,
            update_period_ticks: 0,
            encode: identity_encode,
            decode: identity_decode,
            encode_delta: Some(shrinking_delta),
            decode_delta: Some(noop_decode_delta),
        });

        let mut baseline = WorldSnapshot::new(Tick(0));
        let mut baseline_entity = EntitySnapshot::default();
        baseline_entity.components.insert(
            ComponentTypeId(1),
            super::super::ComponentSnapshot {
                version: ComponentVersion(1),
                data: Bytes::from_static(b"x"),
            },
        );
        baseline.entities.insert(NetworkEntityId(1), baseline_entity);

        let mut current = WorldSnapshot::new(Tick(1));
        let mut entity = EntitySnapshot::default();
        entity.components.insert(
            ComponentTypeId(1),
            super::super::ComponentSnapshot {
                version: ComponentVersion(2),
                data: Bytes::from_static(b"y"),
            },
        );
        current.entities.insert(NetworkEntityId(1), entity);

        let mut last_sent = LastSent::new();
        let deltas = compute_delta(&registry, Some(&baseline), &current, &mut last_sent, 0.9, &HashSet::new()).unwrap();
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].updates[0].base_version.is_none(), "oversized delta should fall back to full encode");
    }

    #[test]
    fn forced_full_resend_ignores_period_and_unchanged_version() {
        let mut registry = ComponentRegistry::new();
        registry.register(ReplicationInfo {
            type_id: ComponentTypeId(1),
            name: "Position".into(),
            flags: ReplicationFlags::REPLICATED,
            update_period_ticks: 100,
            encode: identity_encode,
            decode: identity_decode,
            encode_delta: None,
            decode_delta: None,
        });

        let mut snapshot = WorldSnapshot::new(Tick(1));
        let mut entity = EntitySnapshot::default();
        entity.components.insert(
            ComponentTypeId(1),
            super::super::ComponentSnapshot {
                version: ComponentVersion(1),
                data: Bytes::from_static(b"pos"),
            },
        );
        snapshot.entities.insert(NetworkEntityId(1), entity);
        let map: HashMap<_, _> = snapshot.entities.clone().into_iter().collect();
        let baseline = WorldSnapshot { tick: Tick(0), entities: map };

        let mut last_sent = LastSent::new();
        last_sent.insert((NetworkEntityId(1), ComponentTypeId(1)), Tick(1));
        let mut forced = HashSet::new();
        forced.insert((NetworkEntityId(1), ComponentTypeId(1)));

        let deltas = compute_delta(&registry, Some(&baseline), &snapshot, &mut last_sent, 0.9, &forced).unwrap();
        assert_eq!(deltas.len(), 1, "forced resend must override both the period gate and the unchanged-version skip");
    }
}
