//! Top-level orchestrator: wires every subsystem together and drives the
//! per-tick control flow — drain inbound packets, reassemble/ack/order,
//! decode, apply authority/replication/prediction semantics to the ECS
//! store, then build and send this tick's outbound updates.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;

use crate::authority::AuthoritySystem;
use crate::config::Config;
use crate::connection::handshake::{validate_request, ClientHandshake};
use crate::connection::heartbeat::HeartbeatTimer;
use crate::connection::{ConnectionManager, ConnectionState, PeerConnection};
use crate::ecs::EcsStore;
use crate::error::Result;
use crate::ids::{Entity, PeerId, Tick};
use crate::link::DatagramEndpoint;
use crate::metrics::Metrics;
use crate::prediction::PredictionManager;
use crate::protocol::message::{HandshakeAck, HandshakeRequest, InputMessage, Message, StateSyncKind};
use crate::protocol::{self, MessageFlags, Priority};
use crate::registry::ComponentRegistry;
use crate::replication::interest::DefaultInterest;
use crate::replication::{spawn_message, EntityMap, EntityReplicationState, InterestPolicy, ReplicationEngine};
use crate::transport::channel::ChannelMode;
use crate::transport::header::PacketFlags;

/// Whether this peer arbitrates authority and owns the world, or connects to
/// one that does. Both roles share the same tick machinery; only the
/// handshake and a few authority defaults differ.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Server,
    Client,
}

/// One tick's worth of events the host application reacts to after calling
/// [`Peer::tick`]: newly decoded application messages, in arrival order.
pub struct TickEvents {
    pub inbound_messages: Vec<(PeerId, Message)>,
}

/// The top-level entry point: owns connections, the component registry,
/// authority table, entity map, and replication engine, and drives them
/// against a host-supplied [`EcsStore`] and [`DatagramEndpoint`] once per
/// tick. Single-threaded by construction; the multi-threaded deployment
/// documented in the ambient configuration runs one `Peer` per worker thread
/// behind `crossbeam_channel` queues rather than sharing one across threads.
pub struct Peer {
    pub role: Role,
    pub local_peer_id: PeerId,
    pub tick: Tick,
    pub registry: ComponentRegistry,
    pub connections: ConnectionManager,
    pub authority: AuthoritySystem,
    pub entity_map: EntityMap,
    pub replication: ReplicationEngine,
    pub metrics: Metrics,
    config: Config,
    heartbeats: HashMap<PeerId, HeartbeatTimer>,
    session_counter: u32,
    /// Set for the duration of an in-flight client handshake; cleared once
    /// the ack arrives (accepted or rejected).
    client_handshake: Option<ClientHandshake>,
    pending_server_addr: Option<SocketAddr>,
    pending_heartbeat_acks: HashSet<PeerId>,
    pending_resync_requests: HashMap<PeerId, Vec<(crate::ids::NetworkEntityId, crate::ids::ComponentTypeId)>>,
    pending_inputs: Vec<(PeerId, InputMessage)>,
    predictions: HashMap<Entity, PredictionManager<Bytes>>,
}

impl Peer {
    pub fn new(role: Role, local_peer_id: PeerId, config: Config) -> Self {
        Self {
            role,
            local_peer_id,
            tick: Tick(0),
            registry: ComponentRegistry::new(),
            connections: ConnectionManager::new(),
            authority: AuthoritySystem::new(config.authority.violation_threshold),
            entity_map: EntityMap::default(),
            replication: ReplicationEngine::with_delta_fraction(
                config.replication.snapshot_history_capacity,
                config.replication.delta_max_fraction_of_full,
            ),
            metrics: Metrics::new(),
            heartbeats: HashMap::new(),
            session_counter: 0,
            client_handshake: None,
            pending_server_addr: None,
            pending_heartbeat_acks: HashSet::new(),
            pending_resync_requests: HashMap::new(),
            pending_inputs: Vec::new(),
            predictions: HashMap::new(),
            config,
        }
    }

    /// Admit a connection whose handshake has already completed (the caller
    /// ran [`crate::connection::handshake`] against the inbound request).
    pub fn admit_connection(
        &mut self,
        peer_id: PeerId,
        addr: SocketAddr,
        now: Instant,
    ) -> &mut PeerConnection {
        let connection_id = self.connections.next_connection_id();
        self.session_counter += 1;
        let session_id = self.session_counter;
        let mut conn = PeerConnection::with_codec(
            peer_id,
            addr,
            session_id,
            connection_id,
            &self.config.transport,
            &self.config.codec,
            now,
        );
        conn.state = ConnectionState::Authenticated;
        conn.transport
            .register_channel(REPLICATION_CHANNEL, ChannelMode::RELIABLE_ORDERED);
        conn.transport
            .register_channel(INPUT_CHANNEL, ChannelMode::UNRELIABLE_SEQUENCED);
        self.heartbeats.insert(
            peer_id,
            HeartbeatTimer::new(self.config.connection.heartbeat_interval, now),
        );
        self.connections.insert(conn);
        self.connections.get_mut(peer_id).expect("just inserted")
    }

    pub fn disconnect(&mut self, peer_id: PeerId) {
        self.connections.remove(peer_id);
        self.authority.forget_peer(peer_id);
        self.replication.forget_peer(peer_id);
        self.heartbeats.remove(&peer_id);
        self.pending_heartbeat_acks.remove(&peer_id);
        self.pending_resync_requests.remove(&peer_id);
        self.pending_inputs.retain(|(p, _)| *p != peer_id);
    }

    /// Begin a client handshake against `server_addr`: send a raw
    /// `HandshakeRequest` datagram (no connection, and so no reliability
    /// channel, exists yet) and remember the pending exchange so the ack can
    /// be matched up when it arrives via [`Self::receive`].
    pub fn begin_handshake(
        &mut self,
        endpoint: &mut dyn DatagramEndpoint,
        server_addr: SocketAddr,
        requested_peer_id: Option<PeerId>,
        auth_token: Vec<u8>,
        now: Instant,
    ) -> Result<()> {
        self.client_handshake = Some(ClientHandshake::new());
        self.pending_server_addr = Some(server_addr);
        let request = ClientHandshake::request(requested_peer_id, auth_token);
        self.send_raw(endpoint, server_addr, &Message::Handshake(request), now)
    }

    /// Pick a peer id not already in use by an active connection, for a
    /// handshake request that didn't name one itself.
    fn generate_peer_id(&self) -> PeerId {
        let mut candidate = PeerId(rand::random::<u32>().max(1));
        while candidate.is_server() || self.connections.get(candidate).is_some() {
            candidate = PeerId(rand::random::<u32>().max(1));
        }
        candidate
    }

    /// Server-side admission: validate the request, admit the connection on
    /// success, and ack either way.
    fn handle_handshake_request(
        &mut self,
        endpoint: &mut dyn DatagramEndpoint,
        addr: SocketAddr,
        request: HandshakeRequest,
        now: Instant,
    ) -> Result<()> {
        if let Err(reason) = validate_request(&request, None) {
            tracing::warn!(?addr, %reason, "rejecting handshake request");
            let ack = HandshakeAck {
                assigned_peer_id: PeerId::SERVER,
                session_id: 0,
                server_tick: self.tick,
                accepted: false,
                reject_reason: Some(reason),
            };
            return self.send_raw(endpoint, addr, &Message::HandshakeAck(ack), now);
        }
        let assigned = request
            .requested_peer_id
            .unwrap_or_else(|| self.generate_peer_id());
        let conn = self.admit_connection(assigned, addr, now);
        let session_id = conn.session_id;
        let ack = self.build_handshake_ack(assigned, session_id);
        self.send_message(
            endpoint,
            assigned,
            HEARTBEAT_CHANNEL,
            PacketFlags::RELIABLE,
            &Message::HandshakeAck(ack),
            now,
        )
    }

    /// Client-side: process the server's ack, admitting the server as a
    /// connection on acceptance so ordinary reliable messaging can begin.
    fn handle_handshake_ack(&mut self, ack: HandshakeAck, now: Instant) -> Result<()> {
        let Some(mut handshake) = self.client_handshake.take() else {
            return Ok(());
        };
        let Some(addr) = self.pending_server_addr.take() else {
            return Ok(());
        };
        if let Err(err) = handshake.on_ack(&ack) {
            tracing::warn!(?addr, "handshake rejected by server");
            return Err(err);
        }
        self.local_peer_id = ack.assigned_peer_id;
        let conn = self.admit_connection(PeerId::SERVER, addr, now);
        conn.session_id = ack.session_id;
        Ok(())
    }

    /// A datagram arrived from an address with no established connection:
    /// the only legal contents at this point are handshake messages.
    fn handle_unconnected_datagram(
        &mut self,
        endpoint: &mut dyn DatagramEndpoint,
        addr: SocketAddr,
        datagram: Bytes,
        now: Instant,
    ) -> Result<()> {
        let (header, body) = protocol::decode_framed(datagram)?;
        let message = Message::decode_body(header.type_id, &body)?;
        match message {
            Message::Handshake(request) if self.role == Role::Server => {
                self.handle_handshake_request(endpoint, addr, request, now)
            }
            Message::HandshakeAck(ack) if self.role == Role::Client => {
                self.handle_handshake_ack(ack, now)
            }
            other => {
                tracing::debug!(?addr, type_id = other.type_id(), "dropping unconnected datagram outside the handshake");
                Ok(())
            }
        }
    }

    /// Send a [`Message`] directly to `addr`, bypassing the reliability
    /// transport entirely. Only valid for the handshake, which by definition
    /// predates any [`PeerConnection`].
    fn send_raw(
        &self,
        endpoint: &mut dyn DatagramEndpoint,
        addr: SocketAddr,
        message: &Message,
        _now: Instant,
    ) -> Result<()> {
        let body = message.encode_body()?;
        let framed = protocol::encode_framed(
            message.type_id(),
            0,
            self.local_peer_id,
            0,
            Priority::Normal,
            MessageFlags::empty(),
            &body,
        );
        endpoint.send_to(&framed, addr)
    }

    /// Drain and decode everything currently queued on `endpoint` for every
    /// known connection, returning the application-level messages found.
    pub fn receive(&mut self, endpoint: &mut dyn DatagramEndpoint, now: Instant) -> Result<TickEvents> {
        let mut events = Vec::new();
        let mut buf = [0u8; 2048];

        while let Some((n, addr)) = endpoint.recv_from(&mut buf)? {
            let datagram = Bytes::copy_from_slice(&buf[..n]);
            let Some(peer_id) = self.peer_id_for_addr(addr) else {
                if let Err(err) = self.handle_unconnected_datagram(endpoint, addr, datagram, now) {
                    tracing::debug!(?addr, ?err, "failed to process unconnected datagram");
                }
                continue;
            };
            let conn = self.connections.get_mut(peer_id).expect("looked up by addr");
            conn.last_received_at = now;
            conn.stats.bytes_received += n as u64;

            let received = conn.transport.ingest(datagram, now)?;
            for item in received {
                let (header, body) = protocol::decode_framed(item.payload)?;
                let message = Message::decode_body(header.type_id, &body)?;
                events.push((peer_id, message));
            }
        }

        for conn in self.connections.iter_mut() {
            conn.transport.expire_fragments(now);
        }

        Ok(TickEvents { inbound_messages: events })
    }

    /// Issue retransmits and heartbeats due this tick, flush any
    /// heartbeat acks and delta-resync requests queued by [`Self::apply_inbound`].
    pub fn service_connections(&mut self, endpoint: &mut dyn DatagramEndpoint, now: Instant) -> Result<()> {
        let timeout = self.config.connection.connection_timeout;
        for stale in self.connections.sweep_timeouts(now, timeout) {
            self.authority.forget_peer(stale.peer_id);
            self.replication.forget_peer(stale.peer_id);
            self.heartbeats.remove(&stale.peer_id);
        }

        let peer_ids: Vec<PeerId> = self.connections.iter().map(|c| c.peer_id).collect();
        for peer_id in peer_ids {
            let due = self
                .heartbeats
                .get_mut(&peer_id)
                .map(|timer| timer.poll(now))
                .unwrap_or(false);
            if due {
                self.send_message(endpoint, peer_id, HEARTBEAT_CHANNEL, PacketFlags::HEARTBEAT, &Message::Heartbeat { tick: self.tick }, now)?;
            }
            if let Some(conn) = self.connections.get_mut(peer_id) {
                conn.transport.retransmit_due(endpoint, now)?;
            }
        }

        for peer_id in self.pending_heartbeat_acks.drain().collect::<Vec<_>>() {
            self.send_message(
                endpoint,
                peer_id,
                HEARTBEAT_CHANNEL,
                PacketFlags::HEARTBEAT,
                &Message::HeartbeatAck { tick: self.tick },
                now,
            )?;
        }

        for (peer_id, requested) in std::mem::take(&mut self.pending_resync_requests) {
            let tick = self.tick;
            self.send_message(
                endpoint,
                peer_id,
                REPLICATION_CHANNEL,
                PacketFlags::RELIABLE | PacketFlags::ORDERED,
                &Message::StateSync(crate::protocol::message::StateSync::resync_request(tick, requested)),
                now,
            )?;
        }
        Ok(())
    }

    /// Encode and send one application message over a peer's connection.
    pub fn send_message(
        &mut self,
        endpoint: &mut dyn DatagramEndpoint,
        peer_id: PeerId,
        channel: u8,
        flags: PacketFlags,
        message: &Message,
        now: Instant,
    ) -> Result<()> {
        let Some(conn) = self.connections.get_mut(peer_id) else {
            return Ok(());
        };
        let body = message.encode_body()?;
        let framed = protocol::encode_framed(
            message.type_id(),
            0,
            self.local_peer_id,
            conn.session_id,
            Priority::Normal,
            MessageFlags::empty(),
            &body,
        );
        conn.stats.bytes_sent += framed.len() as u64;
        conn.stats.packets_sent += 1;
        conn.transport.send(endpoint, channel, flags, framed, now)
    }

    /// Build this tick's handshake ack as the server.
    pub fn build_handshake_ack(&mut self, assigned_peer_id: PeerId, session_id: u32) -> HandshakeAck {
        HandshakeAck {
            assigned_peer_id,
            session_id,
            server_tick: self.tick,
            accepted: true,
            reject_reason: None,
        }
    }

    /// Replicate authoritative state to every connected peer, using the
    /// given interest policy (defaults to unfiltered).
    pub fn replicate(
        &mut self,
        endpoint: &mut dyn DatagramEndpoint,
        snapshot: &crate::snapshot::WorldSnapshot,
        policy: Option<&dyn InterestPolicy>,
        now: Instant,
    ) -> Result<()> {
        let default_policy = DefaultInterest;
        let policy = policy.unwrap_or(&default_policy);
        let peer_ids: Vec<PeerId> = self.connections.iter().map(|c| c.peer_id).collect();
        for peer_id in peer_ids {
            let acked_tick = self.replication.last_acked_tick(peer_id);
            let batch = self.replication.replicate_to_peer_with_membership(
                &self.registry,
                peer_id,
                policy,
                snapshot,
                acked_tick,
            )?;
            for net_id in batch.newly_relevant {
                let state = EntityReplicationState {
                    net_id,
                    local_entity: self.entity_map.local_of(net_id).unwrap_or_default(),
                    owner: self.authority.owner_of(net_id),
                };
                let spawn = spawn_message(&state, self.tick);
                self.send_message(
                    endpoint,
                    peer_id,
                    REPLICATION_CHANNEL,
                    PacketFlags::RELIABLE | PacketFlags::ORDERED,
                    &Message::EntitySpawn(spawn),
                    now,
                )?;
            }
            for net_id in batch.no_longer_relevant {
                self.send_message(
                    endpoint,
                    peer_id,
                    REPLICATION_CHANNEL,
                    PacketFlags::RELIABLE | PacketFlags::ORDERED,
                    &Message::EntityDespawn { net_id },
                    now,
                )?;
            }
            for update in batch.updates {
                self.send_message(
                    endpoint,
                    peer_id,
                    REPLICATION_CHANNEL,
                    PacketFlags::RELIABLE | PacketFlags::ORDERED,
                    &Message::ComponentReplication(update),
                    now,
                )?;
            }
        }
        Ok(())
    }

    /// Apply one host's worth of `EcsStore` mutations for inbound replication
    /// messages, enforcing authority before any write.
    pub fn apply_inbound(
        &mut self,
        ecs: &mut dyn EcsStore,
        sender: PeerId,
        message: Message,
    ) -> Result<()> {
        match message {
            Message::ComponentReplication(update) => {
                if let Err(e) = self.authority.check_authority(update.net_id, sender) {
                    self.metrics.record_authority_violation();
                    return Err(e);
                }
                let Some(local) = self.entity_map.local_of(update.net_id) else {
                    return Err(crate::error::ReplicationError::UnknownEntity(update.net_id).into());
                };
                let applied = self.replication.apply_replication(
                    &self.registry,
                    |_net_id, type_id| ecs.get_component_bytes(local, type_id).map(|b| b.to_vec()),
                    &update,
                );
                match applied {
                    Ok(applied) => {
                        self.metrics.record_components_replicated(applied.len() as u64);
                        for (type_id, bytes) in applied {
                            ecs.set_component_bytes(local, type_id, Bytes::from(bytes));
                        }
                        for type_id in update.removed {
                            ecs.remove_component(local, type_id);
                        }
                    }
                    Err(crate::error::CoreError::Replication(
                        crate::error::ReplicationError::MissingDeltaBase { net_id, type_id, .. },
                    )) => {
                        tracing::warn!(?net_id, ?type_id, ?sender, "missing delta base, requesting full resync");
                        self.metrics.record_resync_request();
                        self.pending_resync_requests
                            .entry(sender)
                            .or_default()
                            .push((net_id, type_id));
                    }
                    Err(e) => return Err(e),
                }
            }
            Message::EntitySpawn(spawn) => {
                let local = ecs.create_entity();
                self.entity_map.insert(spawn.net_id, local);
                self.authority.set_owner(spawn.net_id, spawn.owner);
                self.metrics.record_entity_spawn();
            }
            Message::EntityDespawn { net_id } => {
                if let Some(local) = self.entity_map.remove_by_network(net_id) {
                    ecs.destroy_entity(local);
                }
                self.authority.forget_entity(net_id);
                self.metrics.record_entity_despawn();
            }
            Message::EntityOwnership { net_id, new_owner } => {
                self.authority.set_owner(net_id, new_owner);
            }
            Message::Heartbeat { .. } => {
                if let Some(conn) = self.connections.get_mut(sender) {
                    if conn.state == ConnectionState::Authenticated {
                        conn.state = ConnectionState::Connected;
                        tracing::info!(peer = ?sender, "connection fully established");
                    }
                }
                self.pending_heartbeat_acks.insert(sender);
            }
            Message::HeartbeatAck { .. } => {
                if let Some(conn) = self.connections.get_mut(sender) {
                    if conn.state == ConnectionState::Authenticated {
                        conn.state = ConnectionState::Connected;
                        tracing::info!(peer = ?sender, "connection fully established");
                    }
                }
            }
            Message::Disconnect { reason } => {
                tracing::info!(peer = ?sender, %reason, "peer requested disconnect");
                self.disconnect(sender);
            }
            Message::SchemaUpdate(update) => {
                tracing::debug!(type_id = ?update.type_id, name = %update.name, "received schema update");
            }
            Message::Input(input) => {
                let Some(net_id) = self.entity_map.network_of(input.entity) else {
                    tracing::debug!(?sender, entity = ?input.entity, "input for unmapped entity, dropping");
                    return Ok(());
                };
                if let Err(e) = self.authority.check_authority(net_id, sender) {
                    self.metrics.record_authority_violation();
                    return Err(e);
                }
                self.pending_inputs.push((sender, input));
            }
            Message::StateSync(sync) => match sync.kind {
                StateSyncKind::SnapshotAck => {
                    for (net_id, type_id) in sync.resync_requested {
                        self.replication.request_full_resend(sender, net_id, type_id);
                    }
                }
                StateSyncKind::FullSnapshot | StateSyncKind::DeltaSnapshot => {
                    if sync.kind == StateSyncKind::FullSnapshot {
                        self.metrics.record_full_snapshot_received();
                    } else {
                        self.metrics.record_delta_snapshot_received();
                    }
                    let manifest: HashSet<crate::ids::NetworkEntityId> =
                        sync.entities.iter().map(|spawn| spawn.net_id).collect();
                    for spawn in &sync.entities {
                        if self.entity_map.local_of(spawn.net_id).is_none() {
                            let local = ecs.create_entity();
                            self.entity_map.insert(spawn.net_id, local);
                        }
                        self.authority.set_owner(spawn.net_id, spawn.owner);
                    }
                    if sync.kind == StateSyncKind::FullSnapshot {
                        let stale: Vec<_> = self
                            .entity_map
                            .net_ids()
                            .filter(|id| !manifest.contains(id))
                            .collect();
                        for net_id in stale {
                            if let Some(local) = self.entity_map.remove_by_network(net_id) {
                                ecs.destroy_entity(local);
                            }
                            self.authority.forget_entity(net_id);
                        }
                    }
                }
            },
            Message::Handshake(_) | Message::HandshakeAck(_) => {
                tracing::debug!(?sender, "handshake message arrived on an established connection, ignoring");
            }
        }
        Ok(())
    }

    /// Application inputs queued by inbound [`Message::Input`] messages since
    /// the last drain, oldest first.
    pub fn drain_pending_inputs(&mut self) -> Vec<(PeerId, InputMessage)> {
        std::mem::take(&mut self.pending_inputs)
    }

    /// Start tracking client-side prediction state for a locally-predicted
    /// entity.
    pub fn begin_prediction(&mut self, entity: Entity) {
        self.predictions.entry(entity).or_insert_with(|| {
            PredictionManager::with_window(
                self.config.prediction.input_buffer_capacity,
                self.config.prediction.rollback_threshold,
                self.config.prediction.max_prediction_frames,
            )
        });
    }

    pub fn stop_prediction(&mut self, entity: Entity) {
        self.predictions.remove(&entity);
    }

    /// Record a locally-issued input for replay bookkeeping and send it to
    /// the server.
    pub fn send_predicted_input(
        &mut self,
        endpoint: &mut dyn DatagramEndpoint,
        entity: Entity,
        tick: Tick,
        data: Bytes,
        now: Instant,
    ) -> Result<()> {
        if let Some(manager) = self.predictions.get_mut(&entity) {
            manager.record_input(tick, data.clone());
        }
        self.send_message(
            endpoint,
            PeerId::SERVER,
            INPUT_CHANNEL,
            PacketFlags::empty(),
            &Message::Input(InputMessage { entity, tick, data }),
            now,
        )
    }

    /// Reconcile one predicted entity against the server's authoritative
    /// state at `server_tick`, given the host-computed squared distance
    /// between predicted and server state. Returns the recorded inputs to
    /// replay, if any; a [`crate::prediction::ReconciliationOutcome::HardResync`]
    /// means the caller should instead snap to the server's state directly.
    pub fn reconcile_prediction(
        &mut self,
        entity: Entity,
        server_tick: Tick,
        predicted_vs_server_distance_sq: f32,
    ) -> (
        crate::prediction::ReconciliationOutcome,
        Vec<crate::prediction::InputRecord<Bytes>>,
    ) {
        match self.predictions.get_mut(&entity) {
            Some(manager) => {
                let result = manager.reconcile(server_tick, predicted_vs_server_distance_sq);
                if !matches!(result.0, crate::prediction::ReconciliationOutcome::NoCorrectionNeeded) {
                    self.metrics.record_prediction_rollback();
                }
                result
            }
            None => (crate::prediction::ReconciliationOutcome::NoCorrectionNeeded, Vec::new()),
        }
    }

    pub fn advance_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    fn peer_id_for_addr(&self, addr: SocketAddr) -> Option<PeerId> {
        self.connections
            .iter()
            .find(|c| c.addr == addr)
            .map(|c| c.peer_id)
    }
}

pub const REPLICATION_CHANNEL: u8 = 0;
pub const INPUT_CHANNEL: u8 = 1;
pub const HEARTBEAT_CHANNEL: u8 = 2;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::InMemoryEcsStore;
    use crate::link::local::LocalNetwork;

    #[test]
    fn admit_connection_registers_channels_and_heartbeat() {
        let net = LocalNetwork::new();
        let mut server_ep = net.bind();
        let client_ep = net.bind();
        let client_addr = client_ep.local_addr().unwrap();
        let _ = server_ep.local_addr().unwrap();

        let mut server = Peer::new(Role::Server, PeerId::SERVER, Config::default());
        let now = Instant::now();
        server.admit_connection(PeerId(1), client_addr, now);
        assert!(server.connections.get(PeerId(1)).is_some());
    }

    #[test]
    fn disconnect_clears_all_peer_state() {
        let net = LocalNetwork::new();
        let client_ep = net.bind();
        let client_addr = client_ep.local_addr().unwrap();

        let mut server = Peer::new(Role::Server, PeerId::SERVER, Config::default());
        server.admit_connection(PeerId(1), client_addr, Instant::now());
        server.authority.set_owner(crate::ids::NetworkEntityId(1), PeerId(1));
        server.disconnect(PeerId(1));
        assert!(server.connections.get(PeerId(1)).is_none());
        assert_eq!(server.authority.owner_of(crate::ids::NetworkEntityId(1)), PeerId::SERVER);
    }

    #[test]
    fn admit_connection_starts_authenticated_not_connected() {
        let net = LocalNetwork::new();
        let client_ep = net.bind();
        let client_addr = client_ep.local_addr().unwrap();
        let mut server = Peer::new(Role::Server, PeerId::SERVER, Config::default());
        server.admit_connection(PeerId(1), client_addr, Instant::now());
        assert_eq!(server.connections.get(PeerId(1)).unwrap().state, ConnectionState::Authenticated);
    }

    #[test]
    fn full_handshake_admits_client_and_assigns_peer_id() {
        let net = LocalNetwork::new();
        let mut server_ep = net.bind();
        let mut client_ep = net.bind();
        let server_addr = server_ep.local_addr().unwrap();
        let now = Instant::now();

        let mut server = Peer::new(Role::Server, PeerId::SERVER, Config::default());
        let mut client = Peer::new(Role::Client, PeerId(0), Config::default());

        client.begin_handshake(&mut client_ep, server_addr, None, vec![], now).unwrap();
        let events = server.receive(&mut server_ep, now).unwrap();
        assert!(events.inbound_messages.is_empty(), "handshake request is consumed before events");

        let events = client.receive(&mut client_ep, now).unwrap();
        assert!(events.inbound_messages.is_empty(), "handshake ack is consumed before events");

        assert_eq!(client.local_peer_id, PeerId(1));
        assert!(client.connections.get(PeerId::SERVER).is_some());
        assert!(server.connections.get(PeerId(1)).is_some());
    }

    #[test]
    fn heartbeat_after_authentication_marks_connection_connected() {
        let net = LocalNetwork::new();
        let client_ep = net.bind();
        let client_addr = client_ep.local_addr().unwrap();
        let mut server = Peer::new(Role::Server, PeerId::SERVER, Config::default());
        server.admit_connection(PeerId(1), client_addr, Instant::now());
        let mut ecs = InMemoryEcsStore::default();
        server
            .apply_inbound(&mut ecs, PeerId(1), Message::Heartbeat { tick: Tick(1) })
            .unwrap();
        assert_eq!(server.connections.get(PeerId(1)).unwrap().state, ConnectionState::Connected);
        assert!(server.pending_heartbeat_acks.contains(&PeerId(1)));
    }

    #[test]
    fn full_snapshot_spawns_manifested_entities_and_despawns_stale_ones() {
        let mut client = Peer::new(Role::Client, PeerId(1), Config::default());
        let mut ecs = InMemoryEcsStore::default();
        let stale_local = ecs.create_entity();
        client.entity_map.insert(crate::ids::NetworkEntityId(9), stale_local);

        let sync = crate::protocol::message::StateSync::full_snapshot(
            Tick(1),
            vec![crate::protocol::message::EntitySpawn {
                net_id: crate::ids::NetworkEntityId(1),
                owner: PeerId::SERVER,
                tick: Tick(1),
            }],
        );
        client
            .apply_inbound(&mut ecs, PeerId::SERVER, Message::StateSync(sync))
            .unwrap();

        assert!(client.entity_map.local_of(crate::ids::NetworkEntityId(1)).is_some());
        assert!(client.entity_map.local_of(crate::ids::NetworkEntityId(9)).is_none());
    }

    #[test]
    fn missing_delta_base_queues_a_resync_request_instead_of_failing() {
        let mut client = Peer::new(Role::Client, PeerId(1), Config::default());
        let mut ecs = InMemoryEcsStore::default();
        let local = ecs.create_entity();
        client.entity_map.insert(crate::ids::NetworkEntityId(1), local);
        fn identity_encode(bytes: &[u8]) -> Bytes {
            Bytes::copy_from_slice(bytes)
        }
        fn identity_decode(bytes: &Bytes) -> Result<Vec<u8>> {
            Ok(bytes.to_vec())
        }
        client.registry.register(crate::registry::ReplicationInfo {
            type_id: crate::ids::ComponentTypeId(1),
            name: "Position".into(),
            flags: crate::registry::ReplicationFlags::REPLICATED,
            update_period_ticks: 0,
            encode: identity_encode,
            decode: identity_decode,
            encode_delta: None,
            decode_delta: None,
        });

        let update = crate::protocol::message::ComponentReplication {
            net_id: crate::ids::NetworkEntityId(1),
            tick: Tick(2),
            updates: vec![crate::protocol::message::ComponentUpdate {
                type_id: crate::ids::ComponentTypeId(1),
                version: crate::ids::ComponentVersion(2),
                base_version: Some(crate::ids::ComponentVersion(1)),
                data: Bytes::from_static(b"xyz"),
            }],
            removed: vec![],
        };

        client
            .apply_inbound(&mut ecs, PeerId::SERVER, Message::ComponentReplication(update))
            .unwrap();
        assert!(client.pending_resync_requests.contains_key(&PeerId::SERVER));
    }
}
