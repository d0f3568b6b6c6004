//! Index builder configuration

use serde::Deserialize;

use crate::error::{IndexBuildError, Result};

/// Default number of worker-local assigners per batch.
pub const DEFAULT_NUM_WORKERS: usize = 10;

/// Default batch size: 10M parsed triples.
pub const DEFAULT_BATCH_SIZE: usize = 10_000_000;

/// Default per-block uncompressed byte budget: 8 MiB.
pub const DEFAULT_BLOCK_UNCOMPRESSED_BYTES: usize = 8 * 1024 * 1024;

/// Default number of partial vocabularies merged in one pass.
pub const DEFAULT_MAX_FILES_FOR_DIRECT_MERGE: usize = 1000;

/// Default run-sort budget: 256 MB.
pub const DEFAULT_SORT_BUDGET_BYTES: usize = 256 * 1024 * 1024;

/// Default number of words a merge input prefetches per read.
pub const DEFAULT_MERGE_READ_AHEAD_WORDS: usize = 64 * 1024;

/// Default rows per ID-rewrite task.
pub const DEFAULT_REWRITE_BLOCK_ROWS: usize = 64 * 1024;

/// Default multiplier `K` in the worker id range `worker_index * K * batch_size`.
pub const DEFAULT_WORKER_ID_RANGE_FACTOR: u64 = 64;

/// Configuration for an index build.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexBuilderConfig {
    /// Worker-local assigners per batch.
    ///
    /// Default: 10
    pub num_workers: usize,

    /// Parsed triples per batch. Also sizes each worker's id range.
    ///
    /// Default: 10,000,000
    pub batch_size: usize,

    /// Uncompressed byte budget of one permutation block.
    ///
    /// Blocks are cut by bytes, not rows, so the cost of decompressing one
    /// block at scan time is bounded regardless of row width.
    /// Default: 8 MiB
    pub block_uncompressed_bytes: usize,

    /// Derive a has-word triple per distinct word of every literal object.
    pub fulltext: bool,

    /// Write byte-ordered internal words per batch and merge them into a
    /// prefix-compression candidate file.
    pub prefix_compression: bool,

    /// Keep `tmp/` after the build, whether it succeeds or fails.
    pub keep_temp_files: bool,

    /// Fail the merge on a comparator order violation instead of logging it.
    pub strict_vocabulary_order: bool,

    /// Above this many partial vocabularies the merge runs in two stages.
    ///
    /// Default: 1000
    pub max_files_for_direct_merge: usize,

    /// Words read ahead per merge input.
    pub merge_read_ahead_words: usize,

    /// Memory budget of one external sorter's run buffer.
    ///
    /// Default: 256 MB
    pub sort_budget_bytes: usize,

    /// Threads doing global-id lookups in the rewrite stage.
    ///
    /// Default: available parallelism
    pub rewrite_threads: usize,

    /// Triples per rewrite task.
    pub rewrite_block_rows: usize,

    /// Partial-vocabulary writes allowed in flight. The oldest is awaited
    /// before another is dispatched.
    ///
    /// Default: 2
    pub max_pending_vocabulary_writes: usize,

    /// `K` in `worker_index * K * batch_size`: worker-local ids a worker may
    /// mint per parsed triple, on average.
    ///
    /// Default: 64
    pub worker_id_range_factor: u64,

    /// zstd level for permutation blocks and compressed temp files.
    pub zstd_level: i32,

    /// Compress the batch-ordered triple spool and sorter runs.
    pub spool_zstd: bool,
}

impl Default for IndexBuilderConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            block_uncompressed_bytes: DEFAULT_BLOCK_UNCOMPRESSED_BYTES,
            fulltext: false,
            prefix_compression: false,
            keep_temp_files: false,
            strict_vocabulary_order: false,
            max_files_for_direct_merge: DEFAULT_MAX_FILES_FOR_DIRECT_MERGE,
            merge_read_ahead_words: DEFAULT_MERGE_READ_AHEAD_WORDS,
            sort_budget_bytes: DEFAULT_SORT_BUDGET_BYTES,
            rewrite_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            rewrite_block_rows: DEFAULT_REWRITE_BLOCK_ROWS,
            max_pending_vocabulary_writes: 2,
            worker_id_range_factor: DEFAULT_WORKER_ID_RANGE_FACTOR,
            zstd_level: 1,
            spool_zstd: true,
        }
    }
}

impl IndexBuilderConfig {
    /// Create a configuration sized for small datasets and tests.
    pub fn small() -> Self {
        Self {
            num_workers: 2,
            batch_size: 1_000,
            block_uncompressed_bytes: 4 * 1024,
            max_files_for_direct_merge: 8,
            merge_read_ahead_words: 64,
            sort_budget_bytes: 64 * 1024,
            rewrite_threads: 2,
            rewrite_block_rows: 128,
            ..Self::default()
        }
    }

    /// Ids in one worker's range: `K * batch_size`.
    pub fn worker_id_capacity(&self) -> u64 {
        self.worker_id_range_factor
            .saturating_mul(self.batch_size as u64)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("num_workers", self.num_workers),
            ("batch_size", self.batch_size),
            ("block_uncompressed_bytes", self.block_uncompressed_bytes),
            ("merge_read_ahead_words", self.merge_read_ahead_words),
            ("sort_budget_bytes", self.sort_budget_bytes),
            ("rewrite_threads", self.rewrite_threads),
            ("rewrite_block_rows", self.rewrite_block_rows),
            ("max_pending_vocabulary_writes", self.max_pending_vocabulary_writes),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(IndexBuildError::InvalidConfig(format!(
                    "{name} must be positive"
                )));
            }
        }
        if self.max_files_for_direct_merge < 2 {
            return Err(IndexBuildError::InvalidConfig(
                "max_files_for_direct_merge must be at least 2".into(),
            ));
        }
        if self.worker_id_range_factor == 0 {
            return Err(IndexBuildError::InvalidConfig(
                "worker_id_range_factor must be positive".into(),
            ));
        }
        let total = self
            .worker_id_capacity()
            .checked_mul(self.num_workers as u64);
        if total.map_or(true, |t| t > rdf_index_core::id::MAX_PAYLOAD) {
            return Err(IndexBuildError::InvalidConfig(format!(
                "worker id ranges overflow: {} workers x {} ids",
                self.num_workers,
                self.worker_id_capacity()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        IndexBuilderConfig::default().validate().unwrap();
        IndexBuilderConfig::small().validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_workers() {
        let cfg = IndexBuilderConfig {
            num_workers: 0,
            ..IndexBuilderConfig::small()
        };
        assert!(matches!(
            cfg.validate(),
            Err(IndexBuildError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_range_overflow() {
        let cfg = IndexBuilderConfig {
            worker_id_range_factor: u64::MAX / 2,
            ..IndexBuilderConfig::small()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let cfg: IndexBuilderConfig =
            serde_json::from_str(r#"{"num_workers": 3, "fulltext": true}"#).unwrap();
        assert_eq!(cfg.num_workers, 3);
        assert!(cfg.fulltext);
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
    }
}
