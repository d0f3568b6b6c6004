//! Per-batch partial vocabulary.
//!
//! Collapses the N worker maps of one batch into a single sorted, deduplicated
//! word list with contiguous batch-local ids, persists it, and rewrites the
//! batch's triples from worker-local to batch-local ids before releasing them
//! to the ordered triple sink.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rdf_index_core::term::is_blank_node_word;
use rdf_index_core::{Id, WordComparator};
use rustc_hash::FxHashMap;

use super::partial_vocab::PartialVocabWriter;
use super::word_order;
use crate::batch::ProcessedBatch;
use crate::error::{IndexBuildError, Result};
use crate::triples::{BatchSink, IdTriple, OrderedSink};

/// `partial-vocab.00042`
pub fn partial_vocab_file_name(batch: usize) -> String {
    format!("partial-vocab.{batch:05}")
}

/// `partial-vocab-bytes.00042`, the byte-ordered prefix-compression input.
pub fn prefix_candidates_file_name(batch: usize) -> String {
    format!("partial-vocab-bytes.{batch:05}")
}

/// What one batch contributed.
#[derive(Debug, Clone)]
pub struct BatchVocabularyInfo {
    pub batch: usize,
    /// Distinct words in the batch (batch-local ids are `0..num_words`).
    pub num_words: u64,
    pub num_triples: u64,
    pub partial_vocab: PathBuf,
    pub prefix_candidates: Option<PathBuf>,
}

#[derive(Clone)]
pub struct PartialVocabularyWriter {
    comparator: Arc<dyn WordComparator>,
    dir: PathBuf,
    prefix_compression: bool,
}

impl PartialVocabularyWriter {
    pub fn new(
        comparator: Arc<dyn WordComparator>,
        dir: impl Into<PathBuf>,
        prefix_compression: bool,
    ) -> Self {
        Self {
            comparator,
            dir: dir.into(),
            prefix_compression,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sort, dedup and persist the batch's words, then rewrite its triples
    /// to batch-local ids and hand them to `sink` under the batch index.
    pub fn write_batch<S: BatchSink<IdTriple>>(
        &self,
        batch: ProcessedBatch,
        sink: &OrderedSink<S, IdTriple>,
    ) -> Result<BatchVocabularyInfo> {
        let start = Instant::now();
        let ProcessedBatch {
            index,
            workers,
            mut triples,
            ..
        } = batch;

        let mut entries: Vec<(&str, Id, bool)> =
            workers.iter().flat_map(|w| w.iter()).collect();
        let cmp = &*self.comparator;
        entries.par_sort_unstable_by(|a, b| {
            word_order(cmp, a.0, b.0).then_with(|| a.1.cmp(&b.1))
        });

        let mut words: Vec<(&str, bool)> = Vec::with_capacity(entries.len());
        let mut to_batch_local: FxHashMap<u64, u64> =
            FxHashMap::with_capacity_and_hasher(entries.len(), Default::default());
        for &(word, worker_id, is_external) in &entries {
            match words.last_mut() {
                Some(last) if last.0 == word => last.1 |= is_external,
                _ => words.push((word, is_external)),
            }
            let batch_local = words.len() as u64 - 1;
            if let Some(prev) = to_batch_local.insert(worker_id.payload(), batch_local) {
                if prev != batch_local {
                    return Err(IndexBuildError::WorkerIdCollision {
                        id: worker_id,
                        first: words[prev as usize].0.to_string(),
                        second: word.to_string(),
                    });
                }
            }
        }
        drop(entries);

        let (files, rewritten) = rayon::join(
            || self.write_files(index, &words),
            || rewrite_to_batch_local(index, &mut triples, &to_batch_local),
        );
        let (partial_vocab, prefix_candidates) = files?;
        rewritten?;

        let info = BatchVocabularyInfo {
            batch: index,
            num_words: words.len() as u64,
            num_triples: triples.len() as u64,
            partial_vocab,
            prefix_candidates,
        };
        drop(words);
        drop(workers);
        sink.push(index, triples)?;

        tracing::info!(
            batch = index,
            words = info.num_words,
            triples = info.num_triples,
            elapsed_ms = start.elapsed().as_millis(),
            "partial vocabulary written"
        );
        Ok(info)
    }

    fn write_files(
        &self,
        batch: usize,
        words: &[(&str, bool)],
    ) -> Result<(PathBuf, Option<PathBuf>)> {
        let path = self.dir.join(partial_vocab_file_name(batch));
        let mut writer = PartialVocabWriter::create(&path)?;
        for (local, &(word, is_external)) in words.iter().enumerate() {
            writer.write_entry(word, is_external, local as u64)?;
        }
        writer.finish()?;

        if !self.prefix_compression {
            return Ok((path, None));
        }
        let mut internal: Vec<&str> = words
            .iter()
            .filter(|(w, ext)| !ext && !is_blank_node_word(w))
            .map(|(w, _)| *w)
            .collect();
        internal.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        let candidates = self.dir.join(prefix_candidates_file_name(batch));
        let mut writer = PartialVocabWriter::create(&candidates)?;
        for (i, word) in internal.iter().enumerate() {
            writer.write_entry(word, false, i as u64)?;
        }
        writer.finish()?;
        Ok((path, Some(candidates)))
    }
}

/// Replace every vocabulary column of `triples` by its batch-local id.
/// Non-vocabulary ids (ints, the undefined payload) stay as they are.
fn rewrite_to_batch_local(
    batch: usize,
    triples: &mut [IdTriple],
    map: &FxHashMap<u64, u64>,
) -> Result<()> {
    triples.par_iter_mut().try_for_each(|t| {
        for col in t.columns_mut() {
            if let Some(worker_local) = col.vocab_index() {
                let batch_local = map.get(&worker_local).ok_or_else(|| {
                    IndexBuildError::Corrupt(format!(
                        "batch {batch}: worker-local id {worker_local} was never minted"
                    ))
                })?;
                *col = Id::vocab(*batch_local);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchOrchestrator, ParsedTriple};
    use crate::vocab::partial_vocab::PartialVocabReader;
    use crate::vocab::WorkerIdAssigner;
    use rdf_index_core::{ByteOrder, SpecialIds, Term};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("rdf_index_partial_writer_tests")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    type Sink = OrderedSink<Vec<(usize, Vec<IdTriple>)>, IdTriple>;

    fn literal_triple(object: &str) -> ParsedTriple {
        ParsedTriple::new(
            Term::iri("http://x/s"),
            Term::iri("http://x/p"),
            Term::literal(object),
        )
    }

    fn read_words(path: &Path) -> Vec<(String, bool, u64)> {
        PartialVocabReader::open(path)
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (e.word, e.is_external, e.local_id)
            })
            .collect()
    }

    #[test]
    fn test_cross_worker_dedup() {
        let dir = temp_dir("cross_worker");
        let specials = Arc::new(SpecialIds::default());
        // Two workers: worker 0 sees "b","a"; worker 1 sees "a".
        let orchestrator = BatchOrchestrator::new(2, 1_000, false, specials);
        let batch = orchestrator
            .process_batch(
                0,
                vec![literal_triple("b"), literal_triple("a"), literal_triple("a")],
            )
            .unwrap();
        assert_ne!(batch.triples[1].o, batch.triples[2].o);

        let writer = PartialVocabularyWriter::new(Arc::new(ByteOrder), &dir, false);
        let sink: Sink = OrderedSink::new(Vec::new());
        let info = writer.write_batch(batch, &sink).unwrap();
        assert!(info.prefix_candidates.is_none());

        let words = read_words(&info.partial_vocab);
        let locals: Vec<u64> = words.iter().map(|w| w.2).collect();
        assert_eq!(locals, (0..words.len() as u64).collect::<Vec<_>>());
        let sorted: Vec<&str> = words.iter().map(|w| w.0.as_str()).collect();
        let mut expected = sorted.clone();
        expected.sort_unstable();
        expected.dedup();
        assert_eq!(sorted, expected);

        let released = sink.into_inner().unwrap();
        assert_eq!(released.len(), 1);
        let triples = &released[0].1;
        assert_eq!(triples.len(), 3);
        assert_eq!(triples[1].o, triples[2].o);
        let a = triples[1].o.vocab_index().unwrap();
        let b = triples[0].o.vocab_index().unwrap();
        assert!(a < b);
        assert_eq!(words[a as usize].0, "\"a\"");
        // the subject is shared across workers as well
        assert_eq!(triples[0].s, triples[2].s);
    }

    #[test]
    fn test_external_flag_is_or_combined() {
        let dir = temp_dir("external_or");
        let orchestrator = BatchOrchestrator::new(2, 1_000, false, Arc::new(SpecialIds::default()));
        let mut t1 = literal_triple("big");
        t1.object = Term::literal("big").externalized();
        let batch = orchestrator
            .process_batch(0, vec![literal_triple("big"), t1])
            .unwrap();
        let writer = PartialVocabularyWriter::new(Arc::new(ByteOrder), &dir, false);
        let sink: Sink = OrderedSink::new(Vec::new());
        let info = writer.write_batch(batch, &sink).unwrap();
        let words = read_words(&info.partial_vocab);
        let big: Vec<_> = words.iter().filter(|w| w.0 == "\"big\"").collect();
        assert_eq!(big.len(), 1);
        assert!(big[0].1);
    }

    #[test]
    fn test_prefix_candidates_are_internal_byte_order() {
        let dir = temp_dir("prefix_candidates");
        let orchestrator = BatchOrchestrator::new(1, 1_000, false, Arc::new(SpecialIds::default()));
        let mut ext = literal_triple("ext");
        ext.object = Term::literal("ext").externalized();
        let mut blank = literal_triple("x");
        blank.object = Term::blank_node("b0");
        let batch = orchestrator
            .process_batch(0, vec![literal_triple("B"), literal_triple("a"), ext, blank])
            .unwrap();
        let writer = PartialVocabularyWriter::new(Arc::new(ByteOrder), &dir, true);
        let sink: Sink = OrderedSink::new(Vec::new());
        let info = writer.write_batch(batch, &sink).unwrap();
        let path = info.prefix_candidates.unwrap();
        let words: Vec<String> = read_words(&path).into_iter().map(|w| w.0).collect();
        assert!(words.contains(&"\"B\"".to_string()));
        assert!(!words.contains(&"\"ext\"".to_string()));
        assert!(!words.iter().any(|w| w.starts_with("_:")));
        let mut sorted = words.clone();
        sorted.sort();
        assert_eq!(words, sorted);
    }

    #[test]
    fn test_worker_id_collision_detected() {
        let dir = temp_dir("collision");
        let specials = Arc::new(SpecialIds::default());
        // Two assigners sharing one range mint the same id for different words.
        let mut w0 = WorkerIdAssigner::new(0, 1_000, Arc::clone(&specials)).unwrap();
        let mut w1 = WorkerIdAssigner::new(0, 1_000, Arc::clone(&specials)).unwrap();
        let x = w0.get_word_id("\"x\"", false).unwrap();
        let y = w1.get_word_id("\"y\"", false).unwrap();
        assert_eq!(x, y);
        let batch = ProcessedBatch {
            index: 0,
            workers: vec![w0.into_words(), w1.into_words()],
            triples: Vec::new(),
            num_parsed: 0,
        };
        let writer = PartialVocabularyWriter::new(Arc::new(ByteOrder), &dir, false);
        let sink: Sink = OrderedSink::new(Vec::new());
        let err = writer.write_batch(batch, &sink).unwrap_err();
        assert!(matches!(err, IndexBuildError::WorkerIdCollision { .. }));
    }

    #[test]
    fn test_out_of_order_batches_released_in_order() {
        let dir = temp_dir("ordering");
        let orchestrator = BatchOrchestrator::new(1, 1_000, false, Arc::new(SpecialIds::default()));
        let writer = PartialVocabularyWriter::new(Arc::new(ByteOrder), &dir, false);
        let sink: Sink = OrderedSink::new(Vec::new());
        for index in [1usize, 0] {
            let batch = orchestrator
                .process_batch(index, vec![literal_triple("v")])
                .unwrap();
            writer.write_batch(batch, &sink).unwrap();
        }
        let released = sink.into_inner().unwrap();
        let order: Vec<usize> = released.iter().map(|(b, _)| *b).collect();
        assert_eq!(order, vec![0, 1]);
    }
}
