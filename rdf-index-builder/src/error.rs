//! Error types for the index builder

use std::path::PathBuf;

use rdf_index_core::Id;
use thiserror::Error;

/// Index build errors. Every variant aborts the build.
#[derive(Error, Debug)]
pub enum IndexBuildError {
    /// I/O error on an intermediate or output file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rename or delete of a temporary file failed during finalization
    #[error("Temporary file operation failed on {path}: {source}")]
    TempFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A triple of `batch` uses a batch-local id the global merge never mapped
    #[error("Batch {batch}: batch-local id {local_id} has no global id")]
    MissingGlobalId { batch: usize, local_id: u64 },

    /// Two distinct words were minted the same worker-local id
    #[error("Worker-local id {id} assigned to both {first:?} and {second:?}")]
    WorkerIdCollision { id: Id, first: String, second: String },

    /// A worker minted more ids in one batch than its range allows
    #[error("Worker {worker} exhausted its id range of {capacity} ids")]
    WorkerIdRangeExhausted { worker: usize, capacity: u64 },

    /// Adjacent merged words violate the comparator (strict mode only)
    #[error("Vocabulary order violation: {previous:?} is not less than {next:?}")]
    VocabularyOrder { previous: String, next: String },

    /// The word callback stored a word at a position other than its global id
    #[error("Word storage returned index {actual}, expected {expected}")]
    StoredIndexMismatch { expected: u64, actual: u64 },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed intermediate or permutation file
    #[error("Corrupt file: {0}")]
    Corrupt(String),

    /// A background worker thread panicked
    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),
}

impl From<serde_json::Error> for IndexBuildError {
    fn from(e: serde_json::Error) -> Self {
        IndexBuildError::Corrupt(e.to_string())
    }
}

/// Result type for index build operations
pub type Result<T> = std::result::Result<T, IndexBuildError>;

/// Join a background thread, turning a panic into [`IndexBuildError::WorkerPanicked`].
pub(crate) fn join_worker<T>(
    handle: std::thread::JoinHandle<Result<T>>,
    what: &str,
) -> Result<T> {
    handle
        .join()
        .map_err(|_| IndexBuildError::WorkerPanicked(what.to_string()))?
}
