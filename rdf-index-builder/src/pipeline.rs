//! End-to-end index build.
//!
//! ```text
//! parsed triples ─► batches ─► worker assigners ─► partial vocab writers
//!                                                    │ (ordered sink)
//!                                                    ▼
//!        global merge ◄── partial-vocab.NNNNN     triples.spool
//!            │ idmap.NNNNN                            │
//!            └──────────────────► id rewrite ◄────────┘
//!                                     │
//!                        PSO/POS ─► SPO/SOP ─► OSP/OPS
//! ```
//!
//! Intermediate files live in `<out>/tmp/`, which is removed at the end of
//! the build (successful or not) unless `keep_temp_files` is set.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use rdf_index_core::{ByteOrder, Id, Permutation, SpecialIds, WordComparator, PERMUTATION_PAIRS};
use serde::{Deserialize, Serialize};

use crate::batch::{BatchOrchestrator, ParsedTriple, ProcessedBatch};
use crate::config::IndexBuilderConfig;
use crate::error::{join_worker, IndexBuildError, Result};
use crate::permutation::{build_permutation_pair, PairCallbacks, PairInfo, PairOptions};
use crate::rewrite::{rewrite_into_sorter, RewriteOptions};
use crate::triples::{
    BatchSpool, ExternalSorter, IdTriple, OrderedSink, SorterConfig, SpoolOptions,
};
use crate::vocab::{
    merge_prefix_candidates, BatchVocabularyInfo, MergeOptions, PartialVocabularyWriter,
    VocabularyMerger, VocabularyMetaData, WordCallback,
};

pub const STATS_FILE_NAME: &str = "index.stats.json";
pub const VOCABULARY_META_FILE_NAME: &str = "vocabulary.meta.json";
pub const PREFIX_CANDIDATES_FILE_NAME: &str = "vocabulary.prefix-candidates";
const TEMP_DIR_NAME: &str = "tmp";
const SPOOL_FILE_NAME: &str = "triples.spool";

/// Distinct-value counts over triples that use no internal id.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermutationStats {
    pub num_triples: u64,
    pub distinct_subjects: u64,
    pub distinct_predicates: u64,
    pub distinct_objects: u64,
}

#[derive(Debug)]
pub struct IndexBuildResult {
    pub vocabulary: VocabularyMetaData,
    pub batches: Vec<BatchVocabularyInfo>,
    pub num_parsed_triples: u64,
    /// Rows after derivation and exact-duplicate removal.
    pub num_id_triples: u64,
    pub pairs: Vec<PairInfo>,
    pub stats: PermutationStats,
    pub prefix_candidates: Option<PathBuf>,
}

/// Builds a vocabulary and six permutations from one triple stream.
pub struct IndexBuilder {
    config: IndexBuilderConfig,
    comparator: Arc<dyn WordComparator>,
    specials: Arc<SpecialIds>,
    out_dir: PathBuf,
}

impl IndexBuilder {
    /// Byte-order comparator and the default special-IDs table.
    pub fn new(config: IndexBuilderConfig, out_dir: impl Into<PathBuf>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            comparator: Arc::new(ByteOrder),
            specials: Arc::new(SpecialIds::default()),
            out_dir: out_dir.into(),
        })
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn WordComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_special_ids(mut self, specials: SpecialIds) -> Self {
        self.specials = Arc::new(specials);
        self
    }

    pub fn config(&self) -> &IndexBuilderConfig {
        &self.config
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.out_dir.join(TEMP_DIR_NAME)
    }

    /// Run the whole build. `words` receives every distinct non-blank-node
    /// word once, in Global ID order.
    pub fn build<I>(&self, triples: I, words: &mut dyn WordCallback) -> Result<IndexBuildResult>
    where
        I: IntoIterator<Item = ParsedTriple>,
    {
        let _span = tracing::info_span!("build_index", out = %self.out_dir.display()).entered();
        let start = Instant::now();
        let tmp = self.temp_dir();
        std::fs::create_dir_all(&tmp)?;

        let result = self.run(triples, words, &tmp);

        if self.config.keep_temp_files {
            tracing::info!(dir = %tmp.display(), "keeping temporary files");
        } else if let Err(e) = std::fs::remove_dir_all(&tmp) {
            tracing::warn!(dir = %tmp.display(), error = %e, "failed to remove temporary files");
        }

        match &result {
            Ok(r) => tracing::info!(
                parsed = r.num_parsed_triples,
                id_triples = r.num_id_triples,
                words = r.vocabulary.num_words_total,
                blank_nodes = r.vocabulary.num_blank_nodes_total,
                elapsed_ms = start.elapsed().as_millis(),
                "index build complete"
            ),
            Err(e) => tracing::error!(error = %e, "index build failed"),
        }
        result
    }

    fn run<I>(&self, triples: I, words: &mut dyn WordCallback, tmp: &Path) -> Result<IndexBuildResult>
    where
        I: IntoIterator<Item = ParsedTriple>,
    {
        let cfg = &self.config;
        let (batches, spool_path, batch_sizes, num_parsed) = self.write_batches(triples, tmp)?;

        // Global merge.
        let map_dir = tmp.join("maps");
        let partial_files: Vec<PathBuf> = batches.iter().map(|b| b.partial_vocab.clone()).collect();
        let merger = VocabularyMerger::new(
            &*self.comparator,
            &self.specials,
            MergeOptions {
                max_files_for_direct_merge: cfg.max_files_for_direct_merge,
                read_ahead_words: cfg.merge_read_ahead_words,
                strict_order: cfg.strict_vocabulary_order,
            },
            &map_dir,
        );
        let vocabulary = merger.merge(&partial_files, words)?;
        if !cfg.keep_temp_files {
            for path in &partial_files {
                remove_temp(path)?;
            }
        }

        let prefix_candidates = if cfg.prefix_compression {
            let inputs: Vec<PathBuf> = batches
                .iter()
                .filter_map(|b| b.prefix_candidates.clone())
                .collect();
            let out = self.out_dir.join(PREFIX_CANDIDATES_FILE_NAME);
            let n = merge_prefix_candidates(&inputs, &out, cfg.merge_read_ahead_words)?;
            tracing::info!(words = n, "prefix compression candidates merged");
            Some(out)
        } else {
            None
        };

        // Rewrite into the first pair's sorter.
        let first = PERMUTATION_PAIRS[0].0;
        let (sorter, rewrite_stats) = rewrite_into_sorter(
            &spool_path,
            &batch_sizes,
            &RewriteOptions {
                map_dir,
                threads: cfg.rewrite_threads,
                block_rows: cfg.rewrite_block_rows,
                keep_maps: cfg.keep_temp_files,
            },
            ExternalSorter::new(self.sorter_config(tmp, first))?,
        )?;
        if !cfg.keep_temp_files {
            remove_temp(&spool_path)?;
        }

        let (pairs, stats) = self.build_pairs(sorter, &vocabulary, tmp)?;
        let num_id_triples = pairs.first().map_or(0, |p| p.num_rows);
        tracing::debug!(
            spooled = rewrite_stats.triples,
            distinct = num_id_triples,
            "exact duplicates removed by sort"
        );

        write_json(&self.out_dir.join(STATS_FILE_NAME), &stats)?;
        write_json(&self.out_dir.join(VOCABULARY_META_FILE_NAME), &vocabulary)?;

        Ok(IndexBuildResult {
            vocabulary,
            batches,
            num_parsed_triples: num_parsed,
            num_id_triples,
            pairs,
            stats,
            prefix_candidates,
        })
    }

    /// Stages 1 to 3: batch, assign, and write partial vocabularies while the
    /// next batch is assigned.
    fn write_batches<I>(
        &self,
        triples: I,
        tmp: &Path,
    ) -> Result<(Vec<BatchVocabularyInfo>, PathBuf, Vec<u64>, u64)>
    where
        I: IntoIterator<Item = ParsedTriple>,
    {
        let cfg = &self.config;
        let _span = tracing::info_span!("vocabulary_batches", batch_size = cfg.batch_size).entered();
        let vocab_dir = tmp.join("vocab");
        std::fs::create_dir_all(&vocab_dir)?;

        let spool_path = tmp.join(SPOOL_FILE_NAME);
        let sink = Arc::new(OrderedSink::new(BatchSpool::create(
            &spool_path,
            self.spool_options(),
        )?));
        let orchestrator = BatchOrchestrator::new(
            cfg.num_workers,
            cfg.worker_id_capacity(),
            cfg.fulltext,
            Arc::clone(&self.specials),
        );
        let writer = PartialVocabularyWriter::new(
            Arc::clone(&self.comparator),
            &vocab_dir,
            cfg.prefix_compression,
        );

        let mut pending: VecDeque<JoinHandle<Result<BatchVocabularyInfo>>> = VecDeque::new();
        let mut infos = Vec::new();
        let mut num_parsed = 0u64;

        let dispatched = (|| -> Result<()> {
            let mut iter = triples.into_iter().peekable();
            let mut index = 0usize;
            while iter.peek().is_some() {
                let batch: Vec<ParsedTriple> = iter.by_ref().take(cfg.batch_size).collect();
                num_parsed += batch.len() as u64;
                let processed = orchestrator.process_batch(index, batch)?;

                while pending.len() >= cfg.max_pending_vocabulary_writes {
                    if let Some(handle) = pending.pop_front() {
                        infos.push(join_worker(handle, "partial vocabulary writer")?);
                    }
                }
                pending.push_back(spawn_writer(writer.clone(), processed, Arc::clone(&sink))?);
                index += 1;
            }
            Ok(())
        })();

        // Join every writer, even after a failure, before touching the sink.
        let mut first_err = dispatched.err();
        for handle in pending.drain(..) {
            match join_worker(handle, "partial vocabulary writer") {
                Ok(info) => infos.push(info),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        let sink = Arc::try_unwrap(sink).map_err(|_| {
            IndexBuildError::WorkerPanicked("ordered sink still shared after writers joined".into())
        })?;
        let (spool_info, batch_sizes) = sink.into_inner()?.finish()?;
        infos.sort_by_key(|i| i.batch);
        tracing::info!(
            batches = infos.len(),
            parsed = num_parsed,
            spooled = spool_info.record_count,
            spool_bytes = spool_info.byte_len,
            "partial vocabularies written"
        );
        Ok((infos, spool_info.path, batch_sizes, num_parsed))
    }

    /// Stage 6, three times: each pass writes one pair and feeds the sorter
    /// of the next.
    fn build_pairs(
        &self,
        first: ExternalSorter,
        vocabulary: &VocabularyMetaData,
        tmp: &Path,
    ) -> Result<(Vec<PairInfo>, PermutationStats)> {
        let options = PairOptions {
            out_dir: self.out_dir.clone(),
            block_uncompressed_bytes: self.config.block_uncompressed_bytes,
            zstd_level: self.config.zstd_level,
            spill_dir: tmp.join("twin-sort"),
            sort_budget_bytes: self.config.sort_budget_bytes,
            spool: self.spool_options(),
        };
        let is_internal = |id: Id| vocabulary.is_internal_id(id);

        let mut stats = PermutationStats::default();
        let mut pairs = Vec::with_capacity(PERMUTATION_PAIRS.len());
        let mut sorter = Some(first);
        for (i, &(primary, _)) in PERMUTATION_PAIRS.iter().enumerate() {
            let current = sorter
                .take()
                .ok_or_else(|| IndexBuildError::Corrupt(format!("no sorted input for {}", primary.name())))?;
            let mut next = match PERMUTATION_PAIRS.get(i + 1) {
                Some(&(next_primary, _)) => {
                    Some(ExternalSorter::new(self.sorter_config(tmp, next_primary))?)
                }
                None => None,
            };

            let mut distinct = DistinctCounter::default();
            let mut rows = 0u64;
            let mut on_row = |t: &IdTriple| {
                distinct.observe(t.permuted(primary)[0]);
                rows += 1;
            };
            let info = build_permutation_pair(
                current.finish()?,
                primary,
                &options,
                PairCallbacks {
                    next_sorter: next.as_mut(),
                    is_internal: &is_internal,
                    on_row: &mut on_row,
                },
            )?;
            match primary {
                Permutation::Pso | Permutation::Pos => stats.distinct_predicates = distinct.count,
                Permutation::Spo | Permutation::Sop => stats.distinct_subjects = distinct.count,
                Permutation::Osp | Permutation::Ops => stats.distinct_objects = distinct.count,
            }
            stats.num_triples = rows;
            pairs.push(info);
            sorter = next;
        }
        tracing::info!(
            triples = stats.num_triples,
            subjects = stats.distinct_subjects,
            predicates = stats.distinct_predicates,
            objects = stats.distinct_objects,
            "permutation statistics"
        );
        Ok((pairs, stats))
    }

    fn spool_options(&self) -> SpoolOptions {
        SpoolOptions {
            compress_zstd: self.config.spool_zstd,
            zstd_level: self.config.zstd_level,
        }
    }

    fn sorter_config(&self, tmp: &Path, permutation: Permutation) -> SorterConfig {
        SorterConfig {
            run_dir: tmp.join(format!("sort-{}", permutation.name())),
            permutation,
            budget_bytes: self.config.sort_budget_bytes,
            spool: self.spool_options(),
            keep_runs: self.config.keep_temp_files,
        }
    }
}

/// Build an index with the default special-IDs table.
pub fn build_index<I>(
    config: IndexBuilderConfig,
    triples: I,
    comparator: Arc<dyn WordComparator>,
    words: &mut dyn WordCallback,
    out_dir: &Path,
) -> Result<IndexBuildResult>
where
    I: IntoIterator<Item = ParsedTriple>,
{
    IndexBuilder::new(config, out_dir)?
        .with_comparator(comparator)
        .build(triples, words)
}

fn spawn_writer(
    writer: PartialVocabularyWriter,
    batch: ProcessedBatch,
    sink: Arc<OrderedSink<BatchSpool, IdTriple>>,
) -> Result<JoinHandle<Result<BatchVocabularyInfo>>> {
    Ok(std::thread::Builder::new()
        .name(format!("partial-vocab-{}", batch.index))
        .spawn(move || writer.write_batch(batch, &sink))?)
}

/// Counts changes of a sorted key.
#[derive(Default)]
struct DistinctCounter {
    last: Option<Id>,
    count: u64,
}

impl DistinctCounter {
    fn observe(&mut self, key: Id) {
        if self.last != Some(key) {
            self.last = Some(key);
            self.count += 1;
        }
    }
}

fn remove_temp(path: &Path) -> Result<()> {
    std::fs::remove_file(path).map_err(|source| IndexBuildError::TempFile {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
    Ok(())
}
