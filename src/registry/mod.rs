//! Component registry: maps a [`ComponentTypeId`] to the replication
//! behaviour (flags, update cadence) and the codec functions used to turn
//! component bytes into wire updates and back. Entries can be registered at
//! startup (compile-time known types) or at runtime via a `SchemaUpdate`
//! message from the authoritative peer, so the two ends never need to share
//! a build.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{ReplicationError, Result};
use crate::ids::ComponentTypeId;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ReplicationFlags: u16 {
        const REPLICATED        = 0b0000_0001;
        const OWNER_ONLY        = 0b0000_0010;
        const RELIABLE          = 0b0000_0100;
        const ORDERED           = 0b0000_1000;
        const DELTA_COMPRESSED  = 0b0001_0000;
        const HIGH_FREQUENCY    = 0b0010_0000;
        const COSMETIC          = 0b0100_0000;
        const CRITICAL          = 0b1000_0000;
    }
}

pub type EncodeFn = fn(&[u8]) -> Bytes;
pub type DecodeFn = fn(&Bytes) -> Result<Vec<u8>>;
pub type EncodeDeltaFn = fn(base: &[u8], current: &[u8]) -> Bytes;
pub type DecodeDeltaFn = fn(base: &[u8], delta: &Bytes) -> Result<Vec<u8>>;

/// Everything the replication engine needs to know about one component type.
#[derive(Clone)]
pub struct ReplicationInfo {
    pub type_id: ComponentTypeId,
    pub name: String,
    pub flags: ReplicationFlags,
    /// Minimum number of ticks between successive replicated updates; `0`
    /// means "as often as it changes".
    pub update_period_ticks: u32,
    pub encode: EncodeFn,
    pub decode: DecodeFn,
    pub encode_delta: Option<EncodeDeltaFn>,
    pub decode_delta: Option<DecodeDeltaFn>,
}

impl ReplicationInfo {
    pub fn supports_delta(&self) -> bool {
        self.flags.contains(ReplicationFlags::DELTA_COMPRESSED)
            && self.encode_delta.is_some()
            && self.decode_delta.is_some()
    }
}

/// Registers and looks up [`ReplicationInfo`] by type id. Registration is
/// expected at startup and, for dynamically-defined types, on receipt of a
/// `SchemaUpdate`; lookups happen on every replication tick, so this is a
/// plain map rather than something requiring interior mutability.
#[derive(Default)]
pub struct ComponentRegistry {
    entries: HashMap<ComponentTypeId, ReplicationInfo>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: ReplicationInfo) {
        self.entries.insert(info.type_id, info);
    }

    pub fn get(&self, type_id: ComponentTypeId) -> Result<&ReplicationInfo> {
        self.entries
            .get(&type_id)
            .ok_or(ReplicationError::UnknownComponentType(type_id).into())
    }

    pub fn contains(&self, type_id: ComponentTypeId) -> bool {
        self.entries.contains_key(&type_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplicationInfo> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_encode(bytes: &[u8]) -> Bytes {
        Bytes::copy_from_slice(bytes)
    }

    fn identity_decode(bytes: &Bytes) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    #[test]
    fn unregistered_type_is_an_error() {
        let registry = ComponentRegistry::new();
        assert!(registry.get(ComponentTypeId(1)).is_err());
    }

    #[test]
    fn registered_type_round_trips_lookup() {
        let mut registry = ComponentRegistry::new();
        registry.register(ReplicationInfo {
            type_id: ComponentTypeId(1),
            name: "Position".into(),
            flags: ReplicationFlags::REPLICATED | ReplicationFlags::DELTA_COMPRESSED,
            update_period_ticks: 0,
            encode: identity_encode,
            decode: identity_decode,
            encode_delta: None,
            decode_delta: None,
        });
        let info = registry.get(ComponentTypeId(1)).unwrap();
        assert_eq!(info.name, "Position");
        assert!(!info.supports_delta());
    }
}
