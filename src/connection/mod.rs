//! Peer connection lifecycle: handshake, heartbeat keep-alive, and the
//! bookkeeping (rtt, loss, byte counters) the rest of the core reads to make
//! replication and congestion decisions.

pub mod handshake;
pub mod heartbeat;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::codec::{build_compression, build_encryption};
use crate::config::CodecConfig;
use crate::ids::PeerId;
use crate::transport::{Connection as TransportConnection, TransportConfig};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Rolling counters exposed to operators and to the congestion/authority
/// layers; not part of the wire protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnectionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_lost_estimate: u64,
}

impl ConnectionStats {
    pub fn loss_ratio(&self) -> f32 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost_estimate as f32 / self.packets_sent as f32
        }
    }
}

pub struct PeerConnection {
    pub peer_id: PeerId,
    pub addr: SocketAddr,
    pub session_id: u32,
    pub state: ConnectionState,
    pub transport: TransportConnection,
    pub stats: ConnectionStats,
    pub last_received_at: Instant,
    pub authority_violations: u32,
}

impl PeerConnection {
    pub fn new(
        peer_id: PeerId,
        addr: SocketAddr,
        session_id: u32,
        connection_id: u32,
        transport_config: &TransportConfig,
        now: Instant,
    ) -> Self {
        Self::with_codec(peer_id, addr, session_id, connection_id, transport_config, &CodecConfig::default(), now)
    }

    /// Like [`Self::new`], additionally installing the compression/encryption
    /// transforms named by `codec_config` onto the underlying transport.
    pub fn with_codec(
        peer_id: PeerId,
        addr: SocketAddr,
        session_id: u32,
        connection_id: u32,
        transport_config: &TransportConfig,
        codec_config: &CodecConfig,
        now: Instant,
    ) -> Self {
        let mut transport = TransportConnection::new(connection_id, addr, transport_config);
        let compression = build_compression(codec_config);
        let encryption = match codec_config.encryption_key {
            Some(key) => build_encryption(codec_config, &key),
            None if codec_config.encryption != crate::config::Encryption::None => {
                tracing::warn!("encryption requested but no encryption_key configured; sending plaintext");
                None
            }
            None => None,
        };
        transport.set_codecs(compression, encryption);
        Self {
            peer_id,
            addr,
            session_id,
            state: ConnectionState::Connecting,
            transport,
            stats: ConnectionStats::default(),
            last_received_at: now,
            authority_violations: 0,
        }
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_received_at) > timeout
    }
}

/// Owns every active [`PeerConnection`], keyed by the locally-assigned peer
/// id. Authoritative peers (servers) may hold many; a client holds exactly
/// one, to [`PeerId::SERVER`].
#[derive(Default)]
pub struct ConnectionManager {
    connections: HashMap<PeerId, PeerConnection>,
    next_connection_id: u32,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, connection: PeerConnection) {
        self.connections.insert(connection.peer_id, connection);
    }

    pub fn get(&self, peer_id: PeerId) -> Option<&PeerConnection> {
        self.connections.get(&peer_id)
    }

    pub fn get_mut(&mut self, peer_id: PeerId) -> Option<&mut PeerConnection> {
        self.connections.get_mut(&peer_id)
    }

    pub fn remove(&mut self, peer_id: PeerId) -> Option<PeerConnection> {
        self.connections.remove(&peer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerConnection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerConnection> {
        self.connections.values_mut()
    }

    pub fn next_connection_id(&mut self) -> u32 {
        let id = self.next_connection_id;
        self.next_connection_id = self.next_connection_id.wrapping_add(1);
        id
    }

    /// Evict and return every connection that has not been heard from within
    /// `timeout`, logging each at `warn`.
    pub fn sweep_timeouts(&mut self, now: Instant, timeout: Duration) -> Vec<PeerConnection> {
        let stale: Vec<PeerId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.is_timed_out(now, timeout))
            .map(|(id, _)| *id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| {
                let conn = self.connections.remove(&id);
                if conn.is_some() {
                    tracing::warn!(peer = ?id, "connection timed out");
                }
                conn
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportConfig;

    #[test]
    fn sweep_timeouts_removes_stale_connections() {
        let mut manager = ConnectionManager::new();
        let now = Instant::now();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = TransportConfig::default();
        let mut conn = PeerConnection::new(PeerId(1), addr, 1, 0, &config, now);
        conn.last_received_at = now - Duration::from_secs(30);
        manager.insert(conn);

        let stale = manager.sweep_timeouts(now, Duration::from_secs(10));
        assert_eq!(stale.len(), 1);
        assert!(manager.get(PeerId(1)).is_none());
    }
}
