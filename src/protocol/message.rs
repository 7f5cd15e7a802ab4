//! The [`Message`] enum: every payload the transport's reliable/unreliable
//! channels may carry. Encoded with `bincode` inside a [`super::MessageHeader`]
//! frame.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::ids::{ComponentTypeId, ComponentVersion, Entity, NetworkEntityId, PeerId, Tick};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub client_protocol_version: u16,
    pub requested_peer_id: Option<PeerId>,
    pub auth_token: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeAck {
    pub assigned_peer_id: PeerId,
    pub session_id: u32,
    pub server_tick: Tick,
    pub accepted: bool,
    pub reject_reason: Option<String>,
}

/// Runtime registration of a component type not known at compile time on
/// both ends, so a schema mismatch doesn't require a build-time contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaUpdate {
    pub type_id: ComponentTypeId,
    pub name: String,
    pub flags: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntitySpawn {
    pub net_id: NetworkEntityId,
    pub owner: PeerId,
    pub tick: Tick,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentUpdate {
    pub type_id: ComponentTypeId,
    pub version: ComponentVersion,
    /// `None` when this update is a delta against the previous version.
    pub base_version: Option<ComponentVersion>,
    pub data: Bytes,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentReplication {
    pub net_id: NetworkEntityId,
    pub tick: Tick,
    pub updates: Vec<ComponentUpdate>,
    pub removed: Vec<ComponentTypeId>,
}

/// What a [`StateSync`] message is carrying. `SnapshotAck` doubles as the
/// recovery path for a missing delta base: the receiver that hit
/// `MissingDeltaBase` sends one back naming the components it needs resent
/// in full, rather than silently dropping the update.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StateSyncKind {
    FullSnapshot,
    DeltaSnapshot,
    SnapshotAck,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateSync {
    pub kind: StateSyncKind,
    pub tick: Tick,
    pub entities: Vec<EntitySpawn>,
    /// Populated only for `SnapshotAck`: components the sender must resend as
    /// a full encode because the receiver has no baseline for them.
    pub resync_requested: Vec<(NetworkEntityId, ComponentTypeId)>,
}

impl StateSync {
    pub fn full_snapshot(tick: Tick, entities: Vec<EntitySpawn>) -> Self {
        Self { kind: StateSyncKind::FullSnapshot, tick, entities, resync_requested: Vec::new() }
    }

    pub fn delta_snapshot(tick: Tick, entities: Vec<EntitySpawn>) -> Self {
        Self { kind: StateSyncKind::DeltaSnapshot, tick, entities, resync_requested: Vec::new() }
    }

    pub fn resync_request(tick: Tick, resync_requested: Vec<(NetworkEntityId, ComponentTypeId)>) -> Self {
        Self { kind: StateSyncKind::SnapshotAck, tick, entities: Vec::new(), resync_requested }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputMessage {
    pub entity: Entity,
    pub tick: Tick,
    pub data: Bytes,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    Handshake(HandshakeRequest),
    HandshakeAck(HandshakeAck),
    Heartbeat { tick: Tick },
    HeartbeatAck { tick: Tick },
    Disconnect { reason: String },
    SchemaUpdate(SchemaUpdate),
    EntitySpawn(EntitySpawn),
    EntityDespawn { net_id: NetworkEntityId },
    EntityOwnership { net_id: NetworkEntityId, new_owner: PeerId },
    ComponentReplication(ComponentReplication),
    StateSync(StateSync),
    Input(InputMessage),
}

impl Message {
    pub fn type_id(&self) -> u16 {
        match self {
            Message::Handshake(_) => 1,
            Message::HandshakeAck(_) => 2,
            Message::Heartbeat { .. } => 3,
            Message::HeartbeatAck { .. } => 4,
            Message::Disconnect { .. } => 5,
            Message::SchemaUpdate(_) => 6,
            Message::EntitySpawn(_) => 7,
            Message::EntityDespawn { .. } => 8,
            Message::EntityOwnership { .. } => 9,
            Message::ComponentReplication(_) => 10,
            Message::StateSync(_) => 11,
            Message::Input(_) => 12,
        }
    }

    pub fn encode_body(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|_| ProtocolError::Malformed("message encode failure").into())
    }

    pub fn decode_body(type_id: u16, body: &[u8]) -> Result<Self> {
        let message: Message =
            bincode::deserialize(body).map_err(|_| ProtocolError::UnknownMessageType(type_id))?;
        if message.type_id() != type_id {
            return Err(ProtocolError::Malformed("type_id/body mismatch").into());
        }
        Ok(message)
    }
}
