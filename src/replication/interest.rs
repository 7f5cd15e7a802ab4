//! Interest management: decides which entities of a [`WorldSnapshot`] are
//! relevant to a given peer before deltas are computed, so irrelevant
//! entities never cost bandwidth.

use crate::ids::PeerId;
use crate::snapshot::WorldSnapshot;

pub trait InterestPolicy: Send + Sync {
    fn filter(&self, peer: PeerId, snapshot: &WorldSnapshot) -> WorldSnapshot;
}

/// Every entity is relevant to every peer. The right default for small
/// sessions or entities with no spatial extent.
pub struct DefaultInterest;

impl InterestPolicy for DefaultInterest {
    fn filter(&self, _peer: PeerId, snapshot: &WorldSnapshot) -> WorldSnapshot {
        snapshot.clone()
    }
}

/// A position accessor plus a radius: entities are relevant to a peer when
/// within `radius` of that peer's last known position. The position function
/// is supplied by the host since this core has no notion of a `Position`
/// component.
pub struct SpatialInterest<F> {
    pub radius: f32,
    pub peer_position: F,
    pub entity_position: Box<dyn Fn(crate::ids::NetworkEntityId) -> Option<(f32, f32)> + Send + Sync>,
}

impl<F> InterestPolicy for SpatialInterest<F>
where
    F: Fn(PeerId) -> Option<(f32, f32)> + Send + Sync,
{
    fn filter(&self, peer: PeerId, snapshot: &WorldSnapshot) -> WorldSnapshot {
        let Some((px, py)) = (self.peer_position)(peer) else {
            return WorldSnapshot::new(snapshot.tick);
        };
        let mut out = WorldSnapshot::new(snapshot.tick);
        let radius_sq = self.radius * self.radius;
        for (net_id, entity) in &snapshot.entities {
            let Some((ex, ey)) = (self.entity_position)(*net_id) else {
                continue;
            };
            let dx = ex - px;
            let dy = ey - py;
            if dx * dx + dy * dy <= radius_sq {
                out.entities.insert(*net_id, entity.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::NetworkEntityId;
    use crate::snapshot::EntitySnapshot;

    #[test]
    fn default_interest_is_unfiltered() {
        let mut snapshot = WorldSnapshot::new(crate::ids::Tick(0));
        snapshot
            .entities
            .insert(NetworkEntityId(1), EntitySnapshot::default());
        let filtered = DefaultInterest.filter(PeerId(1), &snapshot);
        assert_eq!(filtered.entities.len(), 1);
    }

    #[test]
    fn spatial_interest_excludes_out_of_range_entities() {
        let mut snapshot = WorldSnapshot::new(crate::ids::Tick(0));
        snapshot
            .entities
            .insert(NetworkEntityId(1), EntitySnapshot::default());
        snapshot
            .entities
            .insert(NetworkEntityId(2), EntitySnapshot::default());

        let policy = SpatialInterest {
            radius: 10.0,
            peer_position: |_: PeerId| Some((0.0, 0.0)),
            entity_position: Box::new(|net_id: NetworkEntityId| {
                if net_id == NetworkEntityId(1) {
                    Some((1.0, 1.0))
                } else {
                    Some((100.0, 100.0))
                }
            }),
        };
        let filtered = policy.filter(PeerId(1), &snapshot);
        assert_eq!(filtered.entities.len(), 1);
        assert!(filtered.entities.contains_key(&NetworkEntityId(1)));
    }
}
