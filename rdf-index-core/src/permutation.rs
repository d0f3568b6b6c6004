//! The six column orders over `(S, P, O)`.

use serde::{Deserialize, Serialize};

/// A total order over triples, named by its key columns.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permutation {
    Spo,
    Sop,
    Pso,
    Pos,
    Osp,
    Ops,
}

/// Twin pairs in build order: the first of each pair is the order the input
/// stream is sorted by, the second is written from the same blocks.
pub const PERMUTATION_PAIRS: [(Permutation, Permutation); 3] = [
    (Permutation::Pso, Permutation::Pos),
    (Permutation::Spo, Permutation::Sop),
    (Permutation::Osp, Permutation::Ops),
];

impl Permutation {
    pub const ALL: [Permutation; 6] = [
        Self::Spo,
        Self::Sop,
        Self::Pso,
        Self::Pos,
        Self::Osp,
        Self::Ops,
    ];

    /// Key columns as indices into `(S, P, O) = (0, 1, 2)`.
    pub const fn key_order(self) -> [usize; 3] {
        match self {
            Self::Spo => [0, 1, 2],
            Self::Sop => [0, 2, 1],
            Self::Pso => [1, 0, 2],
            Self::Pos => [1, 2, 0],
            Self::Osp => [2, 0, 1],
            Self::Ops => [2, 1, 0],
        }
    }

    /// The order with the last two key columns swapped.
    pub const fn twin(self) -> Self {
        match self {
            Self::Spo => Self::Sop,
            Self::Sop => Self::Spo,
            Self::Pso => Self::Pos,
            Self::Pos => Self::Pso,
            Self::Osp => Self::Ops,
            Self::Ops => Self::Osp,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Spo => "spo",
            Self::Sop => "sop",
            Self::Pso => "pso",
            Self::Pos => "pos",
            Self::Osp => "osp",
            Self::Ops => "ops",
        }
    }
}
