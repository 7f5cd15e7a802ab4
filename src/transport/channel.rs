//! Channel modes: each message is sent over a channel that combines an
//! ordering guarantee (unordered / sequenced / ordered) with a delivery
//! guarantee (unreliable / reliable). Sequenced and ordered channels buffer
//! out-of-order arrivals and release them in sequence order.

use std::collections::HashMap;

use bytes::Bytes;

use crate::utils::ready_buffer::ReadyBuffer;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OrderingMode {
    /// No ordering guarantee: deliver to the application as soon as it arrives.
    Unordered,
    /// Deliver immediately, but drop anything older than the newest sequence
    /// already delivered.
    Sequenced,
    /// Buffer out-of-order arrivals and deliver strictly in sequence order.
    Ordered,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DeliveryMode {
    Unreliable,
    Reliable,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ChannelMode {
    pub ordering: OrderingMode,
    pub delivery: DeliveryMode,
}

impl ChannelMode {
    pub const fn new(ordering: OrderingMode, delivery: DeliveryMode) -> Self {
        Self { ordering, delivery }
    }

    pub const UNRELIABLE_UNORDERED: Self = Self::new(OrderingMode::Unordered, DeliveryMode::Unreliable);
    pub const UNRELIABLE_SEQUENCED: Self = Self::new(OrderingMode::Sequenced, DeliveryMode::Unreliable);
    pub const RELIABLE_UNORDERED: Self = Self::new(OrderingMode::Unordered, DeliveryMode::Reliable);
    pub const RELIABLE_ORDERED: Self = Self::new(OrderingMode::Ordered, DeliveryMode::Reliable);
}

/// Per-channel receive-side bookkeeping. Each channel id on a connection owns
/// one of these; its mode decides what `accept` does with an arrival.
pub struct ChannelReceiver {
    mode: ChannelMode,
    newest_delivered: Option<u32>,
    reorder: ReadyBuffer<u32, Bytes>,
}

impl ChannelReceiver {
    pub fn new(mode: ChannelMode) -> Self {
        Self {
            mode,
            newest_delivered: None,
            reorder: ReadyBuffer::new(),
        }
    }

    /// Accept an arrival carrying message `sequence`; returns the messages
    /// now ready for delivery to the application, in order.
    pub fn accept(&mut self, sequence: u32, payload: Bytes) -> Vec<Bytes> {
        match self.mode.ordering {
            OrderingMode::Unordered => vec![payload],
            OrderingMode::Sequenced => {
                let is_newer = match self.newest_delivered {
                    None => true,
                    Some(newest) => crate::ids::wrapping_diff_u32(newest, sequence) > 0,
                };
                if is_newer {
                    self.newest_delivered = Some(sequence);
                    vec![payload]
                } else {
                    Vec::new()
                }
            }
            OrderingMode::Ordered => {
                let expected = self
                    .newest_delivered
                    .map(|n| n.wrapping_add(1))
                    .unwrap_or(sequence);
                if crate::ids::wrapping_diff_u32(expected, sequence) < 0 {
                    // already delivered or older than what we expect next
                    return Vec::new();
                }
                self.reorder.push(sequence, payload);
                let mut ready = Vec::new();
                let mut next = expected;
                while let Some((_, item)) = self.reorder.pop_if_ready(next) {
                    ready.push(item);
                    self.newest_delivered = Some(next);
                    next = next.wrapping_add(1);
                }
                ready
            }
        }
    }
}

/// Registry of per-channel receivers for one connection direction, keyed by
/// the small channel id carried in the packet header.
#[derive(Default)]
pub struct ChannelTable {
    channels: HashMap<u8, ChannelReceiver>,
}

impl ChannelTable {
    pub fn register(&mut self, channel: u8, mode: ChannelMode) {
        self.channels.insert(channel, ChannelReceiver::new(mode));
    }

    pub fn accept(&mut self, channel: u8, sequence: u32, payload: Bytes) -> Vec<Bytes> {
        match self.channels.get_mut(&channel) {
            Some(receiver) => receiver.accept(sequence, payload),
            None => vec![payload],
        }
    }
}
