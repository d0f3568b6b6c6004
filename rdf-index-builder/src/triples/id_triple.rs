//! Fixed-width ID tuples flowing through every pipeline stage.
//!
//! ## Wire format
//!
//! Each record is exactly [`RECORD_WIRE_SIZE`] (40) bytes, little-endian:
//! `s | p | o | g | payload`, each the raw bits of an [`Id`].
//!
//! `payload` is a dedicated column for per-triple values that are not
//! entities, such as the term frequency of a has-word triple. Triples without
//! one carry [`Id::UNDEFINED`].

use std::cmp::Ordering;

use rdf_index_core::{Id, Permutation};

/// Number of columns in an [`IdTriple`].
pub const NUM_COLUMNS: usize = 5;

/// Serialized size of one [`IdTriple`].
pub const RECORD_WIRE_SIZE: usize = NUM_COLUMNS * 8;

/// Column index of the graph in [`IdTriple::columns`] and permuted rows.
pub const GRAPH_COLUMN: usize = 3;

/// Column index of the payload in [`IdTriple::columns`] and permuted rows.
pub const PAYLOAD_COLUMN: usize = 4;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IdTriple {
    pub s: Id,
    pub p: Id,
    pub o: Id,
    pub g: Id,
    pub payload: Id,
}

impl IdTriple {
    #[inline]
    pub fn new(s: Id, p: Id, o: Id, g: Id) -> Self {
        Self {
            s,
            p,
            o,
            g,
            payload: Id::UNDEFINED,
        }
    }

    #[inline]
    pub fn with_payload(s: Id, p: Id, o: Id, g: Id, payload: Id) -> Self {
        Self { s, p, o, g, payload }
    }

    /// `[s, p, o, g, payload]`.
    #[inline]
    pub fn columns(&self) -> [Id; NUM_COLUMNS] {
        [self.s, self.p, self.o, self.g, self.payload]
    }

    #[inline]
    pub fn columns_mut(&mut self) -> [&mut Id; NUM_COLUMNS] {
        [
            &mut self.s,
            &mut self.p,
            &mut self.o,
            &mut self.g,
            &mut self.payload,
        ]
    }

    #[inline]
    pub fn from_columns(c: [Id; NUM_COLUMNS]) -> Self {
        Self::with_payload(c[0], c[1], c[2], c[3], c[4])
    }

    /// Row in `perm`'s column order: `[k0, k1, k2, g, payload]`.
    #[inline]
    pub fn permuted(&self, perm: Permutation) -> [Id; NUM_COLUMNS] {
        let spo = [self.s, self.p, self.o];
        let [a, b, c] = perm.key_order();
        [spo[a], spo[b], spo[c], self.g, self.payload]
    }

    /// Inverse of [`permuted`](Self::permuted).
    #[inline]
    pub fn from_permuted(perm: Permutation, row: [Id; NUM_COLUMNS]) -> Self {
        let mut spo = [Id::UNDEFINED; 3];
        for (pos, &col) in perm.key_order().iter().enumerate() {
            spo[col] = row[pos];
        }
        Self::with_payload(spo[0], spo[1], spo[2], row[GRAPH_COLUMN], row[PAYLOAD_COLUMN])
    }

    #[inline]
    pub fn write_le(&self, buf: &mut [u8; RECORD_WIRE_SIZE]) {
        for (i, id) in self.columns().iter().enumerate() {
            buf[i * 8..(i + 1) * 8].copy_from_slice(&id.to_bits().to_le_bytes());
        }
    }

    #[inline]
    pub fn read_le(buf: &[u8; RECORD_WIRE_SIZE]) -> Self {
        let mut cols = [Id::UNDEFINED; NUM_COLUMNS];
        for (i, col) in cols.iter_mut().enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(&buf[i * 8..(i + 1) * 8]);
            *col = Id::from_bits(u64::from_le_bytes(word));
        }
        Self::from_columns(cols)
    }
}

/// Total order of `perm`: key columns, then graph, then payload.
#[inline]
pub fn cmp_for_permutation(perm: Permutation, a: &IdTriple, b: &IdTriple) -> Ordering {
    a.permuted(perm).cmp(&b.permuted(perm))
}
