//! # RDF Index Builder
//!
//! Offline construction of an RDF triple index: a deduplicated, globally
//! numbered vocabulary and six block-compressed permutations sharing one id
//! space.
//!
//! ## Pipeline
//!
//! 1. [`batch`]: parsed triples are cut into batches and split across
//!    worker-local id assigners with disjoint id ranges
//! 2. [`vocab::partial_writer`]: each batch's worker maps are merged into a
//!    sorted partial vocabulary with contiguous batch-local ids, and the
//!    batch's triples are appended to one spool in batch order
//! 3. [`vocab::merge`]: k-way merge of the partial vocabularies assigns
//!    Global IDs and writes a batch-local to global map per batch
//! 4. [`rewrite`]: the spool is rewritten to global ids into an external
//!    sorter
//! 5. [`permutation`]: sorted triples become twin permutation pairs with
//!    shared block boundaries, PSO/POS then SPO/SOP then OSP/OPS
//!
//! [`pipeline::IndexBuilder`] runs all stages.

pub mod batch;
pub mod config;
pub mod error;
pub mod kway;
pub mod permutation;
pub mod pipeline;
pub mod rewrite;
pub mod triples;
pub mod vocab;

pub use batch::{BatchOrchestrator, ParsedTriple, ProcessedBatch};
pub use config::IndexBuilderConfig;
pub use error::{IndexBuildError, Result};
pub use permutation::{
    build_permutation_pair, PairCallbacks, PairInfo, PairOptions, PermutationReader,
};
pub use pipeline::{build_index, IndexBuildResult, IndexBuilder, PermutationStats};
pub use triples::IdTriple;
pub use vocab::{
    read_vocabulary, VocabularyMerger, VocabularyMetaData, WordCallback, WordFileSink,
};
