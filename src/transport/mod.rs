//! Reliable-datagram transport built on top of the raw [`crate::link`]
//! endpoint: packetization, fragmentation, acknowledgment/retransmission and
//! per-channel ordering. One [`Connection`] owns the full send/receive path
//! for a single peer.

pub mod channel;
pub mod fragment;
pub mod header;
pub mod reliability;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::codec::{CompressionCodec, EncryptionCodec, IdentityCompression};
use crate::error::{ProtocolError, Result};
use crate::link::DatagramEndpoint;

use channel::{ChannelMode, ChannelTable};
use fragment::{FragmentAssembler, FragmentSplitter};
use header::{PacketFlags, PacketHeader};
use reliability::ReliabilityState;

/// Practical ceiling on a single UDP datagram's payload before fragmentation
/// kicks in; comfortably under typical path MTU once IP/UDP overhead is
/// subtracted.
pub const DEFAULT_FRAGMENT_THRESHOLD: usize = 1024;
pub const DEFAULT_FRAGMENT_TTL: Duration = Duration::from_secs(3);
pub const DEFAULT_MIN_RTO: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub fragment_threshold: usize,
    pub fragment_ttl: Duration,
    pub min_rto: Duration,
    pub max_retransmits: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            fragment_threshold: DEFAULT_FRAGMENT_THRESHOLD,
            fragment_ttl: DEFAULT_FRAGMENT_TTL,
            min_rto: DEFAULT_MIN_RTO,
            max_retransmits: reliability::DEFAULT_MAX_RETRANSMITS,
        }
    }
}

/// A fully-assembled inbound message, stripped of header and fragmentation,
/// ready to hand to the protocol layer.
pub struct Received {
    pub channel: u8,
    pub payload: Bytes,
}

/// The transport state for one remote peer: packetizes outbound messages,
/// reassembles and deduplicates inbound ones, and drives retransmission.
pub struct Connection {
    pub remote_addr: SocketAddr,
    connection_id: u32,
    reliability: ReliabilityState,
    splitter: FragmentSplitter,
    assembler: FragmentAssembler,
    channels: ChannelTable,
    fragment_threshold: usize,
    compression: Arc<dyn CompressionCodec>,
    encryption: Option<Arc<dyn EncryptionCodec>>,
}

impl Connection {
    pub fn new(connection_id: u32, remote_addr: SocketAddr, config: &TransportConfig) -> Self {
        Self {
            remote_addr,
            connection_id,
            reliability: ReliabilityState::new(connection_id, config.min_rto, config.max_retransmits),
            splitter: FragmentSplitter::new(),
            assembler: FragmentAssembler::new(config.fragment_ttl),
            channels: ChannelTable::default(),
            fragment_threshold: config.fragment_threshold,
            compression: Arc::new(IdentityCompression),
            encryption: None,
        }
    }

    pub fn register_channel(&mut self, channel: u8, mode: ChannelMode) {
        self.channels.register(channel, mode);
    }

    /// Install the compression/encryption transforms applied to every
    /// message this connection sends or receives, after framing but before
    /// packetization. Call once, right after construction.
    pub fn set_codecs(&mut self, compression: Arc<dyn CompressionCodec>, encryption: Option<Arc<dyn EncryptionCodec>>) {
        self.compression = compression;
        self.encryption = encryption;
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.reliability.smoothed_rtt()
    }

    pub fn unacked_count(&self) -> usize {
        self.reliability.unacked_count()
    }

    /// Packetize `payload` for `channel` under `flags` and push it onto the
    /// endpoint, fragmenting first if it doesn't fit in one datagram.
    pub fn send(
        &mut self,
        endpoint: &mut dyn DatagramEndpoint,
        channel: u8,
        flags: PacketFlags,
        payload: Bytes,
        now: Instant,
    ) -> Result<()> {
        let payload = self.compression.compress(&payload);
        let payload = match &self.encryption {
            Some(codec) => codec.encrypt(&payload)?,
            None => payload,
        };
        if payload.len() <= self.fragment_threshold {
            self.send_single(endpoint, channel, flags, None, payload, now)
        } else {
            for (info, chunk) in self.splitter.split(&payload, self.fragment_threshold) {
                self.send_single(endpoint, channel, flags | PacketFlags::FRAGMENT, Some(info), chunk, now)?;
            }
            Ok(())
        }
    }

    fn send_single(
        &mut self,
        endpoint: &mut dyn DatagramEndpoint,
        channel: u8,
        flags: PacketFlags,
        fragment: Option<header::FragmentInfo>,
        payload: Bytes,
        now: Instant,
    ) -> Result<()> {
        let sequence = self.reliability.next_send(channel, flags, payload.clone(), now);
        self.emit(endpoint, channel, flags, fragment, sequence, payload)
    }

    fn emit(
        &self,
        endpoint: &mut dyn DatagramEndpoint,
        channel: u8,
        flags: PacketFlags,
        fragment: Option<header::FragmentInfo>,
        sequence: u32,
        payload: Bytes,
    ) -> Result<()> {
        let (ack, ack_bitfield) = self.reliability.ack_fields();
        let header = PacketHeader {
            connection_id: self.connection_id,
            sequence,
            ack,
            ack_bitfield,
            flags,
            channel,
            payload_len: payload.len() as u16,
            fragment,
        };
        let mut buf = BytesMut::with_capacity(header.encoded_len() + payload.len());
        header.encode(&mut buf);
        buf.extend_from_slice(&payload);
        endpoint.send_to(&buf, self.remote_addr)
    }

    /// Re-send anything whose retransmission timeout has elapsed. Call once
    /// per tick.
    pub fn retransmit_due(&mut self, endpoint: &mut dyn DatagramEndpoint, now: Instant) -> Result<()> {
        for (sequence, channel, flags, payload) in self.reliability.collect_retransmits(now)? {
            self.emit(endpoint, channel, flags, None, sequence, payload)?;
        }
        Ok(())
    }

    pub fn expire_fragments(&mut self, now: Instant) -> Vec<u16> {
        self.assembler.expire(now)
    }

    /// Decode one raw datagram already known to belong to this connection.
    /// Returns zero or more fully-reassembled, order-released messages.
    pub fn ingest(&mut self, mut datagram: Bytes, now: Instant) -> Result<Vec<Received>> {
        let header = PacketHeader::decode(&mut datagram)?;
        if datagram.len() < header.payload_len as usize {
            return Err(ProtocolError::BufferTooShort {
                needed: header.payload_len as usize,
                available: datagram.len(),
            }
            .into());
        }
        let payload = datagram.slice(0..header.payload_len as usize);
        let is_new = self
            .reliability
            .on_receive(header.sequence, header.ack, header.ack_bitfield, now);
        if !is_new {
            return Ok(Vec::new());
        }

        let complete = if let Some(info) = header.fragment {
            self.assembler.ingest(info, payload, now)?
        } else {
            Some(payload)
        };

        let Some(complete) = complete else {
            return Ok(Vec::new());
        };
        let complete = match &self.encryption {
            Some(codec) => codec.decrypt(&complete)?,
            None => complete,
        };
        let complete = self.compression.decompress(&complete)?;

        Ok(self
            .channels
            .accept(header.channel, header.sequence, complete)
            .into_iter()
            .map(|payload| Received {
                channel: header.channel,
                payload,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::local::LocalNetwork;
    use crate::transport::channel::ChannelMode;

    #[test]
    fn round_trip_small_payload_over_local_network() {
        let net = LocalNetwork::new();
        let mut a_ep = net.bind();
        let mut b_ep = net.bind();
        let b_addr = b_ep.local_addr().unwrap();
        let a_addr = a_ep.local_addr().unwrap();

        let config = TransportConfig::default();
        let mut a = Connection::new(1, b_addr, &config);
        let mut b = Connection::new(1, a_addr, &config);
        b.register_channel(0, ChannelMode::RELIABLE_ORDERED);

        let now = Instant::now();
        a.send(&mut a_ep, 0, PacketFlags::RELIABLE, Bytes::from_static(b"hello"), now)
            .unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = b_ep.recv_from(&mut buf).unwrap().unwrap();
        let received = b.ingest(Bytes::copy_from_slice(&buf[..n]), now).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(&received[0].payload[..], b"hello");
    }

    #[test]
    fn oversized_payload_fragments_and_reassembles() {
        let net = LocalNetwork::new();
        let mut a_ep = net.bind();
        let mut b_ep = net.bind();
        let b_addr = b_ep.local_addr().unwrap();
        let a_addr = a_ep.local_addr().unwrap();

        let mut config = TransportConfig::default();
        config.fragment_threshold = 16;
        let mut a = Connection::new(1, b_addr, &config);
        let mut b = Connection::new(1, a_addr, &config);

        let now = Instant::now();
        let payload = Bytes::from(vec![7u8; 100]);
        a.send(&mut a_ep, 0, PacketFlags::RELIABLE, payload.clone(), now)
            .unwrap();

        let mut assembled = Vec::new();
        let mut buf = [0u8; 2048];
        while let Some((n, _)) = b_ep.recv_from(&mut buf).unwrap() {
            let mut out = b.ingest(Bytes::copy_from_slice(&buf[..n]), now).unwrap();
            assembled.append(&mut out);
        }
        assert_eq!(assembled.len(), 1);
        assert_eq!(assembled[0].payload, payload);
    }
}
