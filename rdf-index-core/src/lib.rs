//! # RDF Index Core
//!
//! Shared data model for the RDF index builder.
//!
//! This crate provides:
//! - [`Id`]: a tagged 64-bit identifier whose datatype keeps vocabulary
//!   indices, blank-node indices and inline integers in disjoint spaces
//! - [`Term`]: a parsed RDF term (or an already-resolved `Id`) and its
//!   normalized vocabulary representation
//! - [`WordComparator`]: the injected total order over vocabulary words
//! - [`SpecialIds`] and the internal IRIs the builder derives triples with
//! - [`Permutation`]: the six column orders over `(S, P, O)`

pub mod comparator;
pub mod id;
pub mod permutation;
pub mod special;
pub mod term;

pub use comparator::{ByteOrder, CaseFoldOrder, WordComparator};
pub use id::{Datatype, Id};
pub use permutation::{Permutation, PERMUTATION_PAIRS};
pub use special::SpecialIds;
pub use term::Term;
