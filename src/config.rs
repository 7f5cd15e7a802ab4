//! Aggregated runtime configuration. Each group mirrors one subsystem's
//! tunables and carries the same defaults that subsystem's `Default` impl
//! would use standalone; [`Config::default`] is what a host gets for free.

use std::time::Duration;

use crate::connection::heartbeat::{DEFAULT_CONNECTION_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL};
use crate::transport::TransportConfig;

#[derive(Clone, Debug)]
pub struct ReplicationConfig {
    pub enabled: bool,
    pub tick_rate_hz: u32,
    pub snapshot_history_capacity: usize,
    pub default_update_period_ticks: u32,
    pub interest_enabled: bool,
    pub interest_radius: f32,
    /// A delta is sent only if its encoded size is below this fraction of
    /// the full encoding; otherwise the full encoding is sent instead.
    pub delta_max_fraction_of_full: f32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_rate_hz: 30,
            snapshot_history_capacity: 64,
            default_update_period_ticks: 0,
            interest_enabled: false,
            interest_radius: 50.0,
            delta_max_fraction_of_full: 0.9,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PredictionConfig {
    pub enabled: bool,
    pub input_buffer_capacity: usize,
    pub max_prediction_frames: u32,
    /// Magnitude threshold (host distance units, squared): at or below this,
    /// predicted and authoritative state are considered equal and no replay
    /// is needed.
    pub rollback_threshold: f32,
    pub interpolation_delay_ticks: u32,
    /// How far past the newest buffered sample a render tick may extrapolate
    /// before interpolation holds the last known value instead.
    pub extrapolation_limit_ticks: u32,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            input_buffer_capacity: 128,
            max_prediction_frames: 10,
            rollback_threshold: 0.1,
            interpolation_delay_ticks: 2,
            extrapolation_limit_ticks: 6,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
    None,
    Lz4,
    Zstd,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encryption {
    None,
    Aes256Gcm,
    ChaCha20Poly1305,
}

#[derive(Clone, Debug)]
pub struct CodecConfig {
    pub compression: Compression,
    pub compression_level: u32,
    pub encryption: Encryption,
    /// Pre-shared AEAD key. Required whenever `encryption` isn't `None`; a
    /// connection falls back to plaintext (with a warning) if it's unset.
    pub encryption_key: Option<[u8; 32]>,
    pub key_rotation_interval: Duration,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            compression_level: 1,
            encryption: Encryption::None,
            encryption_key: None,
            key_rotation_interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthorityConfig {
    pub violation_threshold: u32,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self { violation_threshold: 8 }
    }
}

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub heartbeat_interval: Duration,
    pub connection_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}

/// What to do with a cross-thread queue once it's at capacity. Default
/// mirrors the unreliable-channel/reliable-channel split: unreliable
/// traffic can afford to lose the oldest entry, reliable traffic cannot
/// silently lose anything so the connection is torn down instead.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QueueOverflowPolicy {
    DropNewest,
    DropOldest,
    Disconnect,
}

/// Bounded-queue capacities for the channels that cross thread boundaries in
/// the multi-threaded concurrency model (see [`crate::peer`]).
#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub inbound_message_capacity: usize,
    pub outbound_message_capacity: usize,
    pub unreliable_overflow_policy: QueueOverflowPolicy,
    pub reliable_overflow_policy: QueueOverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            inbound_message_capacity: 4096,
            outbound_message_capacity: 4096,
            unreliable_overflow_policy: QueueOverflowPolicy::DropOldest,
            reliable_overflow_policy: QueueOverflowPolicy::Disconnect,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub transport: TransportConfig,
    pub replication: ReplicationConfig,
    pub prediction: PredictionConfig,
    pub codec: CodecConfig,
    pub authority: AuthorityConfig,
    pub connection: ConnectionConfig,
    pub queues: QueueConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let config = Config::default();
        assert!(config.replication.snapshot_history_capacity > 0);
        assert!(config.connection.heartbeat_interval < config.connection.connection_timeout);
    }
}
