//! Error taxonomy. Every fallible operation returns a
//! discriminated [`CoreError`]; recoverable per-packet errors are handled
//! locally by callers via a counter increment or a log line rather than a
//! bubbled error.

use crate::ids::{ComponentTypeId, NetworkEntityId, PeerId};

pub type Result<T> = core::result::Result<T, CoreError>;

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Reliability(#[from] ReliabilityError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Replication(#[from] ReplicationError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("operation cancelled: shutdown in progress")]
    Cancelled,
}

/// Socket-level failures.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("requested bind address is unavailable")]
    AddressUnavailable,
    #[error("socket operation failed with code {0}")]
    SocketError(i32),
    #[error("operation would block")]
    WouldBlock,
}

/// Malformed or unexpected wire data.
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("packet magic mismatch")]
    BadMagic,
    #[error("unsupported protocol version {0}")]
    VersionMismatch(u16),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("unknown message type id {0}")]
    UnknownMessageType(u16),
    #[error("malformed payload: {0}")]
    Malformed(&'static str),
    #[error("buffer too short: needed {needed} bytes, had {available}")]
    BufferTooShort { needed: usize, available: usize },
}

/// Reliability-layer failures.
#[derive(thiserror::Error, Debug)]
pub enum ReliabilityError {
    #[error("retransmit ceiling exceeded, connection timed out")]
    RetransmitCeilingExceeded,
    #[error("fragment reassembly timed out for fragment_id {0}")]
    FragmentTimeout(u16),
    #[error("payload exceeds maximum fragmentable size")]
    PayloadTooLarge,
}

/// Handshake and ownership failures.
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    #[error("authority violation: peer {sender:?} is not owner of entity {net_id:?}")]
    AuthorityViolation {
        sender: PeerId,
        net_id: NetworkEntityId,
    },
    #[error("violation threshold exceeded for peer {0:?}")]
    ViolationThresholdExceeded(PeerId),
}

/// Replication-layer failures.
#[derive(thiserror::Error, Debug)]
pub enum ReplicationError {
    #[error("missing delta base for entity {net_id:?} component {type_id:?} at tick {base_tick}")]
    MissingDeltaBase {
        net_id: NetworkEntityId,
        type_id: ComponentTypeId,
        base_tick: u32,
    },
    #[error("unknown net_id {0:?} beyond reorder window")]
    UnknownEntity(NetworkEntityId),
    #[error("unknown component type {0:?}")]
    UnknownComponentType(ComponentTypeId),
    #[error("component version skip detected for entity {net_id:?} component {type_id:?}")]
    VersionSkip {
        net_id: NetworkEntityId,
        type_id: ComponentTypeId,
    },
}

/// Bounded-queue and history-store exhaustion.
#[derive(thiserror::Error, Debug)]
pub enum ResourceError {
    #[error("queue '{queue}' is full (capacity {capacity})")]
    QueueOverflow { queue: &'static str, capacity: usize },
    #[error("snapshot history exhausted: tick {tick} predates oldest retained snapshot")]
    SnapshotHistoryExhausted { tick: u32 },
}
