//! Vocabulary construction: worker-local ids, per-batch partial
//! vocabularies, and the global merge.

use std::cmp::Ordering;

use rdf_index_core::WordComparator;

pub mod id_map;
pub mod item_map;
pub mod merge;
pub mod metadata;
pub mod partial_vocab;
pub mod partial_writer;
pub mod word_sink;

pub use id_map::{IdMapReader, IdMapWriter};
pub use item_map::{WordArena, WorkerIdAssigner, WorkerWords};
pub use merge::{merge_prefix_candidates, MergeOptions, VocabularyMerger, WordCallback};
pub use metadata::{IdRangeForPrefix, VocabularyMetaData};
pub use partial_vocab::{PartialVocabEntry, PartialVocabReader, PartialVocabWriter};
pub use partial_writer::{BatchVocabularyInfo, PartialVocabularyWriter};
pub use word_sink::{read_vocabulary, WordFileSink};

/// The injected comparator refined by byte order.
///
/// Words the comparator treats as equivalent stay distinct and adjacent.
/// Partial vocabularies are sorted and merged in this order.
#[inline]
pub fn word_order(comparator: &dyn WordComparator, a: &str, b: &str) -> Ordering {
    comparator
        .compare(a, b)
        .then_with(|| a.as_bytes().cmp(b.as_bytes()))
}
