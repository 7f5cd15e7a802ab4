//! Fragmentation: a payload larger than `mtu - header_size` is
//! split into fragments that each travel as their own reliable packet sharing
//! a `fragment_id`; the receiver reassembles once every fragment of that id
//! has arrived, or discards the set after `fragment_ttl` elapses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::error::{ReliabilityError, Result};
use crate::transport::header::FragmentInfo;

/// Splits an oversized payload into `fragment_count` chunks of at most
/// `fragment_size` bytes each, tagged with a shared `fragment_id`.
pub struct FragmentSplitter {
    next_fragment_id: u16,
}

impl Default for FragmentSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentSplitter {
    pub fn new() -> Self {
        Self { next_fragment_id: 0 }
    }

    pub fn split(&mut self, payload: &Bytes, fragment_size: usize) -> Vec<(FragmentInfo, Bytes)> {
        let fragment_id = self.next_fragment_id;
        self.next_fragment_id = self.next_fragment_id.wrapping_add(1);
        let fragment_count = payload.len().div_ceil(fragment_size).max(1) as u16;
        (0..fragment_count)
            .map(|index| {
                let start = index as usize * fragment_size;
                let end = (start + fragment_size).min(payload.len());
                let chunk = payload.slice(start..end);
                (
                    FragmentInfo {
                        fragment_id,
                        fragment_index: index,
                        fragment_count,
                    },
                    chunk,
                )
            })
            .collect()
    }
}

struct PendingFragmentSet {
    slots: Vec<Option<Bytes>>,
    received: usize,
    first_seen: Instant,
}

/// Reassembles fragmented payloads on the receive side, keyed by
/// `fragment_id`. A set older than `fragment_ttl` is dropped wholesale; if
/// the owning channel is reliable, retransmission of the missing fragments
/// eventually completes a fresh set.
pub struct FragmentAssembler {
    pending: HashMap<u16, PendingFragmentSet>,
    ttl: Duration,
}

impl FragmentAssembler {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            ttl,
        }
    }

    /// Feed one fragment in. Returns `Ok(Some(payload))` once the full set is
    /// present, `Ok(None)` while still waiting on more fragments.
    pub fn ingest(
        &mut self,
        info: FragmentInfo,
        data: Bytes,
        now: Instant,
    ) -> Result<Option<Bytes>> {
        let set = self.pending.entry(info.fragment_id).or_insert_with(|| {
            PendingFragmentSet {
                slots: vec![None; info.fragment_count as usize],
                received: 0,
                first_seen: now,
            }
        });
        let index = info.fragment_index as usize;
        if index >= set.slots.len() {
            return Err(ReliabilityError::FragmentTimeout(info.fragment_id).into());
        }
        if set.slots[index].is_none() {
            set.slots[index] = Some(data);
            set.received += 1;
        }
        if set.received == set.slots.len() {
            let set = self.pending.remove(&info.fragment_id).unwrap();
            let mut out = BytesMut::new();
            for slot in set.slots {
                out.extend_from_slice(&slot.expect("all slots filled"));
            }
            return Ok(Some(out.freeze()));
        }
        Ok(None)
    }

    /// Evict fragment sets older than `ttl`. Called once per tick.
    pub fn expire(&mut self, now: Instant) -> Vec<u16> {
        let ttl = self.ttl;
        let expired: Vec<u16> = self
            .pending
            .iter()
            .filter(|(_, set)| now.duration_since(set.first_seen) > ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.pending.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_exact_fragment_count_at_boundary() {
        let mut splitter = FragmentSplitter::new();
        let payload = Bytes::from(vec![0u8; 100]);
        assert_eq!(splitter.split(&payload, 100).len(), 1);
        assert_eq!(splitter.split(&payload, 99).len(), 2);
    }

    #[test]
    fn reassembles_out_of_order_fragments() {
        let mut splitter = FragmentSplitter::new();
        let payload = Bytes::from(b"hello fragmented world!!".to_vec());
        let fragments = splitter.split(&payload, 6);
        assert!(fragments.len() > 1);

        let mut assembler = FragmentAssembler::new(Duration::from_secs(1));
        let now = Instant::now();
        let mut result = None;
        for (info, chunk) in fragments.into_iter().rev() {
            result = assembler.ingest(info, chunk, now).unwrap();
        }
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn expires_stale_sets() {
        let mut assembler = FragmentAssembler::new(Duration::from_millis(10));
        let info = FragmentInfo {
            fragment_id: 1,
            fragment_index: 0,
            fragment_count: 2,
        };
        let now = Instant::now();
        assembler.ingest(info, Bytes::from_static(b"a"), now).unwrap();
        let later = now + Duration::from_millis(50);
        let expired = assembler.expire(later);
        assert_eq!(expired, vec![1]);
    }
}
