//! Application-level message framing carried inside transport payloads:
//! a fixed header (type id, message id, checksum, sender/session) followed by
//! a type-specific body. Distinct from [`crate::transport::header`], which
//! frames the unreliable packet itself.

pub mod message;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::ids::PeerId;

pub use message::Message;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MessageFlags: u8 {
        const COMPRESSED = 0b0000_0001;
        const ENCRYPTED  = 0b0000_0010;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Priority::Low,
            2 => Priority::High,
            3 => Priority::Critical,
            _ => Priority::Normal,
        }
    }
}

/// Precedes every encoded [`Message`] body. `message_id` is a monotonic
/// per-sender counter used by higher layers (e.g. ordered replication
/// streams) independent of the transport sequence number.
#[derive(Clone, Debug)]
pub struct MessageHeader {
    pub type_id: u16,
    pub message_id: u32,
    pub sender: PeerId,
    pub session_id: u32,
    pub priority: Priority,
    pub flags: MessageFlags,
    pub payload_len: u32,
    pub checksum: u32,
}

impl MessageHeader {
    pub const ENCODED_LEN: usize = 2 + 4 + 4 + 4 + 1 + 1 + 4 + 4;

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u16_le(self.type_id);
        out.put_u32_le(self.message_id);
        out.put_u32_le(self.sender.0);
        out.put_u32_le(self.session_id);
        out.put_u8(self.priority as u8);
        out.put_u8(self.flags.bits());
        out.put_u32_le(self.payload_len);
        out.put_u32_le(self.checksum);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.len() < Self::ENCODED_LEN {
            return Err(ProtocolError::BufferTooShort {
                needed: Self::ENCODED_LEN,
                available: buf.len(),
            }
            .into());
        }
        Ok(Self {
            type_id: buf.get_u16_le(),
            message_id: buf.get_u32_le(),
            sender: PeerId(buf.get_u32_le()),
            session_id: buf.get_u32_le(),
            priority: Priority::from_u8(buf.get_u8()),
            flags: MessageFlags::from_bits_truncate(buf.get_u8()),
            payload_len: buf.get_u32_le(),
            checksum: buf.get_u32_le(),
        })
    }
}

/// Encode a framed message: header + body, with the checksum computed over
/// the body bytes only.
pub fn encode_framed(
    type_id: u16,
    message_id: u32,
    sender: PeerId,
    session_id: u32,
    priority: Priority,
    flags: MessageFlags,
    body: &[u8],
) -> Bytes {
    let checksum = crc32fast::hash(body);
    let header = MessageHeader {
        type_id,
        message_id,
        sender,
        session_id,
        priority,
        flags,
        payload_len: body.len() as u32,
        checksum,
    };
    let mut out = BytesMut::with_capacity(MessageHeader::ENCODED_LEN + body.len());
    header.encode(&mut out);
    out.extend_from_slice(body);
    out.freeze()
}

/// Decode a framed message's header and validate its checksum against the
/// trailing body bytes, returning both.
pub fn decode_framed(mut buf: Bytes) -> Result<(MessageHeader, Bytes)> {
    let header = MessageHeader::decode(&mut buf)?;
    if buf.len() < header.payload_len as usize {
        return Err(ProtocolError::BufferTooShort {
            needed: header.payload_len as usize,
            available: buf.len(),
        }
        .into());
    }
    let body = buf.slice(0..header.payload_len as usize);
    let actual = crc32fast::hash(&body);
    if actual != header.checksum {
        return Err(ProtocolError::ChecksumMismatch.into());
    }
    Ok((header, body))
}
