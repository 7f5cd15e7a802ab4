//! Core identifiers: [`Entity`], [`NetworkEntityId`], [`ComponentTypeId`], [`Tick`],
//! [`ComponentVersion`]. Tick and the packet/message sequence counters wrap around
//! their backing integer; comparisons use serial-number ("modular") arithmetic so
//! wraparound after 2^32 never breaks ordering.

use core::cmp::Ordering;
use core::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

/// Opaque entity identifier: 32-bit index + 32-bit generation, as owned by the
/// host ECS store. The core never interprets these bits; it only compares and
/// stores them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Entity {
    pub index: u32,
    pub generation: u32,
}

impl Entity {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

/// Globally-unique (within a session) id assigned by the authoritative peer
/// at registration time. Bidirectionally mapped to a local [`Entity`] on every
/// peer holding a replica (see `replication::EntityMap`).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NetworkEntityId(pub u64);

/// A stable id for a component type, agreed across peers either by
/// registration order (exchanged during handshake) or by a content hash of
/// the type's schema.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ComponentTypeId(pub u32);

/// Identifies a connected peer. `PeerId(0)` is reserved for "server
/// authoritative" (see `authority`).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl PeerId {
    pub const SERVER: PeerId = PeerId(0);

    pub fn is_server(self) -> bool {
        self == Self::SERVER
    }
}

/// Retrieves the wrapping difference `b - a`, interpreting both as points on a
/// ring of size 2^16. Used by every wrapping id below to compare "who is more
/// recent" across a wraparound boundary.
pub fn wrapping_diff_u16(a: u16, b: u16) -> i16 {
    b.wrapping_sub(a) as i16
}

/// Same as [`wrapping_diff_u16`] but over a ring of size 2^32, used for
/// [`Tick`] and [`ComponentVersion`] ("sequence-number
/// wraparound... comparisons use modular arithmetic with window size < 2^31").
pub fn wrapping_diff_u32(a: u32, b: u32) -> i32 {
    b.wrapping_sub(a) as i32
}

macro_rules! wrapping_id_u32 {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn wrapping_add(self, rhs: u32) -> Self {
                Self(self.0.wrapping_add(rhs))
            }

            pub fn wrapping_sub(self, rhs: u32) -> Self {
                Self(self.0.wrapping_sub(rhs))
            }

            /// True if `self` is strictly more recent than `other` under
            /// modular (serial-number) comparison.
            pub fn is_after(self, other: Self) -> bool {
                wrapping_diff_u32(other.0, self.0) > 0
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                match wrapping_diff_u32(other.0, self.0) {
                    0 => Ordering::Equal,
                    x if x > 0 => Ordering::Greater,
                    _ => Ordering::Less,
                }
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Add<u32> for $name {
            type Output = Self;
            fn add(self, rhs: u32) -> Self::Output {
                self.wrapping_add(rhs)
            }
        }

        impl AddAssign<u32> for $name {
            fn add_assign(&mut self, rhs: u32) {
                *self = self.wrapping_add(rhs);
            }
        }

        impl Sub for $name {
            type Output = i32;
            fn sub(self, rhs: Self) -> Self::Output {
                wrapping_diff_u32(rhs.0, self.0)
            }
        }
    };
}

wrapping_id_u32!(Tick);
wrapping_id_u32!(ComponentVersion);
wrapping_id_u32!(Sequence);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_wraps_around() {
        let a = Tick(u32::MAX);
        let b = a.wrapping_add(2);
        assert_eq!(b.0, 1);
        assert!(b.is_after(a));
        assert!(b > a);
    }

    #[test]
    fn component_version_strictly_increasing() {
        let v0 = ComponentVersion(10);
        let v1 = v0.wrapping_add(1);
        assert!(v1.is_after(v0));
        assert!(!v0.is_after(v1));
    }

    #[test]
    fn entity_bits_roundtrip() {
        let e = Entity::new(42, 7);
        assert_eq!(Entity::from_bits(e.to_bits()), e);
    }
}
