//! Wire layout of the per-packet header.
//! All multi-byte integers are little-endian; fixed 24 bytes, +6 if `FRAGMENT`
//! is set.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

pub const PACKET_MAGIC: u32 = 0xEC50_C0DE;
pub const PROTOCOL_VERSION: u16 = 1;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        const FRAGMENT   = 0b0000_0001;
        const RELIABLE   = 0b0000_0010;
        const ORDERED    = 0b0000_0100;
        const HEARTBEAT  = 0b0000_1000;
        const COMPRESSED = 0b0001_0000;
        const ENCRYPTED  = 0b0010_0000;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentInfo {
    pub fragment_id: u16,
    pub fragment_index: u16,
    pub fragment_count: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub connection_id: u32,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bitfield: u32,
    pub flags: PacketFlags,
    pub channel: u8,
    pub payload_len: u16,
    pub fragment: Option<FragmentInfo>,
}

impl PacketHeader {
    pub const FIXED_LEN: usize = 24;
    pub const FRAGMENT_LEN: usize = 6;

    pub fn encoded_len(&self) -> usize {
        Self::FIXED_LEN + if self.fragment.is_some() { Self::FRAGMENT_LEN } else { 0 }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(PACKET_MAGIC);
        out.put_u16_le(PROTOCOL_VERSION);
        out.put_u32_le(self.connection_id);
        out.put_u32_le(self.sequence);
        out.put_u32_le(self.ack);
        out.put_u32_le(self.ack_bitfield);
        out.put_u8(self.flags.bits());
        out.put_u8(self.channel);
        out.put_u16_le(self.payload_len);
        if let Some(frag) = &self.fragment {
            out.put_u16_le(frag.fragment_id);
            out.put_u16_le(frag.fragment_index);
            out.put_u16_le(frag.fragment_count);
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.len() < Self::FIXED_LEN {
            return Err(ProtocolError::BufferTooShort {
                needed: Self::FIXED_LEN,
                available: buf.len(),
            }
            .into());
        }
        let magic = buf.get_u32_le();
        if magic != PACKET_MAGIC {
            return Err(ProtocolError::BadMagic.into());
        }
        let version = buf.get_u16_le();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch(version).into());
        }
        let connection_id = buf.get_u32_le();
        let sequence = buf.get_u32_le();
        let ack = buf.get_u32_le();
        let ack_bitfield = buf.get_u32_le();
        let flags = PacketFlags::from_bits_truncate(buf.get_u8());
        let channel = buf.get_u8();
        let payload_len = buf.get_u16_le();
        let fragment = if flags.contains(PacketFlags::FRAGMENT) {
            if buf.len() < Self::FRAGMENT_LEN {
                return Err(ProtocolError::BufferTooShort {
                    needed: Self::FRAGMENT_LEN,
                    available: buf.len(),
                }
                .into());
            }
            Some(FragmentInfo {
                fragment_id: buf.get_u16_le(),
                fragment_index: buf.get_u16_le(),
                fragment_count: buf.get_u16_le(),
            })
        } else {
            None
        };
        Ok(Self {
            connection_id,
            sequence,
            ack,
            ack_bitfield,
            flags,
            channel,
            payload_len,
            fragment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_without_fragment() {
        let header = PacketHeader {
            connection_id: 7,
            sequence: 42,
            ack: 41,
            ack_bitfield: 0b101,
            flags: PacketFlags::RELIABLE | PacketFlags::ORDERED,
            channel: 3,
            payload_len: 128,
            fragment: None,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PacketHeader::FIXED_LEN);
        let mut bytes: Bytes = buf.freeze();
        let decoded = PacketHeader::decode(&mut bytes).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn header_roundtrip_with_fragment() {
        let header = PacketHeader {
            connection_id: 1,
            sequence: 1,
            ack: 0,
            ack_bitfield: 0,
            flags: PacketFlags::FRAGMENT | PacketFlags::RELIABLE,
            channel: 0,
            payload_len: 900,
            fragment: Some(FragmentInfo {
                fragment_id: 5,
                fragment_index: 1,
                fragment_count: 2,
            }),
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PacketHeader::FIXED_LEN + PacketHeader::FRAGMENT_LEN);
        let mut bytes: Bytes = buf.freeze();
        assert_eq!(PacketHeader::decode(&mut bytes).unwrap(), header);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(0xDEAD_BEEF);
        buf.put_bytes(0, PacketHeader::FIXED_LEN - 4);
        let mut bytes: Bytes = buf.freeze();
        assert!(matches!(
            PacketHeader::decode(&mut bytes),
            Err(crate::error::CoreError::Protocol(ProtocolError::BadMagic))
        ));
    }
}
