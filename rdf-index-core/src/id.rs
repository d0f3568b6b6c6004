//! Tagged identifiers for vocabulary words, blank nodes and inline values.
//!
//! An [`Id`] is a `u64` split into a 4-bit [`Datatype`] tag (high bits) and a
//! 60-bit payload (low bits):
//!
//! ```text
//!   63      60 59                                                  0
//!  +---------+------------------------------------------------------+
//!  | datatype|                      payload                         |
//!  +---------+------------------------------------------------------+
//! ```
//!
//! Word Global IDs and blank-node indices are numbered independently and may
//! coincide numerically. The tag keeps them apart: `Id::vocab(3)` and
//! `Id::blank_node(3)` are different identifiers, and the kind-specific
//! accessors ([`Id::vocab_index`], [`Id::blank_node_index`]) refuse to read
//! one as the other.
//!
//! Ordering is on the raw bits, so all ids of one datatype sort together and
//! within a datatype by payload.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of payload bits in an [`Id`].
pub const PAYLOAD_BITS: u32 = 60;

/// Largest payload an [`Id`] can carry.
pub const MAX_PAYLOAD: u64 = (1u64 << PAYLOAD_BITS) - 1;

// ============================================================================
// Datatype
// ============================================================================

/// Datatype tag stored in the high nibble of an [`Id`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Datatype {
    /// Sentinel. With a non-zero payload it names an entry of the
    /// special-IDs table that still has to be resolved to a vocabulary id.
    Undefined = 0,
    /// Index into the vocabulary. Worker-local, batch-local or global
    /// depending on the pipeline stage that produced it.
    VocabIndex = 1,
    /// Index in the blank-node numbering space.
    BlankNodeIndex = 2,
    /// Unsigned inline integer (used for term-frequency payloads).
    Int = 3,
}

impl Datatype {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Undefined),
            1 => Some(Self::VocabIndex),
            2 => Some(Self::BlankNodeIndex),
            3 => Some(Self::Int),
            _ => None,
        }
    }

    /// Short tag used in `Debug`/`Display` output.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Undefined => "U",
            Self::VocabIndex => "V",
            Self::BlankNodeIndex => "B",
            Self::Int => "I",
        }
    }
}

// ============================================================================
// Id
// ============================================================================

/// A tagged 64-bit identifier. See the [module docs](self).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Id(u64);

impl Id {
    /// The plain undefined id (`Undefined` tag, payload 0).
    pub const UNDEFINED: Id = Id(0);

    #[inline]
    const fn make(datatype: Datatype, payload: u64) -> Self {
        assert!(payload <= MAX_PAYLOAD, "Id payload exceeds 60 bits");
        Id(((datatype as u64) << PAYLOAD_BITS) | payload)
    }

    /// Reinterpret raw bits (as read from disk).
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Id(bits)
    }

    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// A vocabulary index.
    ///
    /// # Panics
    /// If `index` does not fit in 60 bits.
    #[inline]
    pub const fn vocab(index: u64) -> Self {
        Self::make(Datatype::VocabIndex, index)
    }

    /// A blank-node index.
    ///
    /// # Panics
    /// If `index` does not fit in 60 bits.
    #[inline]
    pub const fn blank_node(index: u64) -> Self {
        Self::make(Datatype::BlankNodeIndex, index)
    }

    /// An inline unsigned integer.
    ///
    /// # Panics
    /// If `value` does not fit in 60 bits.
    #[inline]
    pub const fn int(value: u64) -> Self {
        Self::make(Datatype::Int, value)
    }

    /// An `Undefined`-tagged placeholder naming entry `slot` of a special-IDs
    /// table. Slot 0 is [`Id::UNDEFINED`].
    #[inline]
    pub const fn special_placeholder(slot: u64) -> Self {
        Self::make(Datatype::Undefined, slot)
    }

    /// Datatype tag. Unknown tags (never produced by this crate) read as
    /// `Undefined`.
    #[inline]
    pub fn datatype(self) -> Datatype {
        Datatype::from_u8((self.0 >> PAYLOAD_BITS) as u8).unwrap_or(Datatype::Undefined)
    }

    /// Raw 60-bit payload, regardless of datatype.
    #[inline]
    pub const fn payload(self) -> u64 {
        self.0 & MAX_PAYLOAD
    }

    #[inline]
    pub fn is_undefined(self) -> bool {
        self.datatype() == Datatype::Undefined
    }

    #[inline]
    pub fn is_vocab(self) -> bool {
        self.datatype() == Datatype::VocabIndex
    }

    /// The vocabulary index, if this is a `VocabIndex` id.
    #[inline]
    pub fn vocab_index(self) -> Option<u64> {
        (self.datatype() == Datatype::VocabIndex).then_some(self.payload())
    }

    /// The blank-node index, if this is a `BlankNodeIndex` id.
    #[inline]
    pub fn blank_node_index(self) -> Option<u64> {
        (self.datatype() == Datatype::BlankNodeIndex).then_some(self.payload())
    }

    /// The inline integer, if this is an `Int` id.
    #[inline]
    pub fn int_value(self) -> Option<u64> {
        (self.datatype() == Datatype::Int).then_some(self.payload())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.datatype().short_name(), self.payload())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
