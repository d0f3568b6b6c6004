//! Global vocabulary merge.
//!
//! K-way merges the P partial vocabularies (one per batch) in the injected
//! word order and assigns Global IDs.
//!
//! ## Algorithm
//!
//! 1. Open every partial file behind a prefetching reader and pre-size one
//!    id map per batch from the file's record count
//! 2. Pop the smallest entry in [`word_order`]; entries with the same word
//!    form a *run*
//! 3. Per run: OR the external flags; blank nodes take the next blank-node
//!    index, every other word takes the next word Global ID and is handed to
//!    the [`WordCallback`]
//! 4. For every occurrence `(batch, batch_local_id)` of the run, append
//!    `(batch_local_id, id)` to that batch's map. Map writes go through a
//!    double buffer flushed by a background thread
//!
//! Global IDs come from single-threaded state owned by the merge; only file
//! read-ahead and map writing run on other threads.
//!
//! With more than `max_files_for_direct_merge` inputs the merge runs in two
//! stages: groups of files are first merged into intermediate partial
//! vocabularies (with per-batch maps into the group), the group files are
//! merged globally, and the two maps are composed per batch.

use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};

use rdf_index_core::term::is_blank_node_word;
use rdf_index_core::{ByteOrder, Id, SpecialIds, WordComparator};

use super::id_map::{id_map_file_name, IdMapReader, IdMapWriter};
use super::metadata::VocabularyMetaData;
use super::partial_vocab::{PartialVocabEntry, PartialVocabWriter, PrefetchingVocabReader};
use super::word_order;
use crate::error::{join_worker, IndexBuildError, Result};
use crate::kway::KWayMerge;

/// Entries buffered before a map flush is handed to the background writer.
const MAP_WRITE_BUFFER_ENTRIES: usize = 256 * 1024;

// ============================================================================
// WordCallback
// ============================================================================

/// Receives each distinct non-blank-node word exactly once, in ascending
/// Global ID order, and persists it. Returns the index the word was stored
/// at, which must equal its Global ID.
pub trait WordCallback {
    fn push_word(&mut self, word: &str, is_external: bool) -> io::Result<u64>;
}

impl<F: FnMut(&str, bool) -> io::Result<u64>> WordCallback for F {
    fn push_word(&mut self, word: &str, is_external: bool) -> io::Result<u64> {
        self(word, is_external)
    }
}

// ============================================================================
// VocabularyMerger
// ============================================================================

/// Settings of a global merge.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub max_files_for_direct_merge: usize,
    pub read_ahead_words: usize,
    /// Fail instead of warning on a comparator order violation.
    pub strict_order: bool,
}

pub struct VocabularyMerger<'a> {
    comparator: &'a dyn WordComparator,
    specials: &'a SpecialIds,
    options: MergeOptions,
    /// Directory receiving `idmap.NNNNN` and intermediate files.
    map_dir: PathBuf,
}

/// Statistics of one merge pass.
#[derive(Debug, Default, Clone, Copy)]
struct PassStats {
    input_entries: u64,
    runs: u64,
    order_violations: u64,
}

impl<'a> VocabularyMerger<'a> {
    pub fn new(
        comparator: &'a dyn WordComparator,
        specials: &'a SpecialIds,
        options: MergeOptions,
        map_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            comparator,
            specials,
            options,
            map_dir: map_dir.into(),
        }
    }

    /// Merge `partial_files` (index = batch) into the global vocabulary.
    ///
    /// Writes `idmap.NNNNN` for every batch into the map directory.
    pub fn merge(
        &self,
        partial_files: &[PathBuf],
        callback: &mut dyn WordCallback,
    ) -> Result<VocabularyMetaData> {
        let _span = tracing::info_span!("vocabulary_merge", files = partial_files.len()).entered();
        let start = std::time::Instant::now();
        std::fs::create_dir_all(&self.map_dir)?;

        let mut meta = VocabularyMetaData::new(self.specials);
        let map_paths: Vec<PathBuf> = (0..partial_files.len())
            .map(|b| self.map_dir.join(id_map_file_name(b)))
            .collect();

        let stats = if partial_files.len() <= self.options.max_files_for_direct_merge {
            self.merge_pass(partial_files, Some(&map_paths[..]), &mut |word: &str, ext: bool| {
                assign_global(&mut meta, callback, word, ext)
            })?
        } else {
            self.merge_two_stage(partial_files, &map_paths, &mut meta, callback)?
        };

        tracing::info!(
            words = meta.num_words_total,
            blank_nodes = meta.num_blank_nodes_total,
            entries = stats.input_entries,
            order_violations = stats.order_violations,
            elapsed_ms = start.elapsed().as_millis(),
            "vocabulary merge complete"
        );
        Ok(meta)
    }

    fn merge_two_stage(
        &self,
        partial_files: &[PathBuf],
        map_paths: &[PathBuf],
        meta: &mut VocabularyMetaData,
        callback: &mut dyn WordCallback,
    ) -> Result<PassStats> {
        let group_size = self.options.max_files_for_direct_merge;
        let groups: Vec<&[PathBuf]> = partial_files.chunks(group_size).collect();
        if groups.len() > group_size {
            return Err(IndexBuildError::InvalidConfig(format!(
                "{} partial vocabularies exceed two-stage merge capacity of {}",
                partial_files.len(),
                group_size * group_size
            )));
        }
        tracing::info!(
            files = partial_files.len(),
            groups = groups.len(),
            "partial vocabularies exceed direct merge limit; merging in two stages"
        );

        // Stage 1: each group into one intermediate vocabulary.
        let mut group_files = Vec::with_capacity(groups.len());
        let mut stage_one_maps: Vec<PathBuf> = Vec::with_capacity(partial_files.len());
        let mut total = PassStats::default();
        for (g, files) in groups.iter().enumerate() {
            let group_path = self.map_dir.join(format!("group-vocab.{g:05}"));
            let first_batch = g * group_size;
            let maps: Vec<PathBuf> = (first_batch..first_batch + files.len())
                .map(|b| self.map_dir.join(format!("group-idmap.{b:05}")))
                .collect();

            let mut writer = PartialVocabWriter::create(&group_path)?;
            let stats = self.merge_pass(files, Some(&maps[..]), &mut |word: &str, ext: bool| {
                let id = writer.count();
                writer.write_entry(word, ext, id)?;
                Ok(Id::vocab(id))
            })?;
            let words = writer.finish()?;
            tracing::debug!(group = g, files = files.len(), words, "stage one group merged");

            total.input_entries += stats.input_entries;
            total.order_violations += stats.order_violations;
            group_files.push(group_path);
            stage_one_maps.extend(maps);
        }

        // Stage 2: groups into the global vocabulary.
        let group_maps: Vec<PathBuf> = (0..group_files.len())
            .map(|g| self.map_dir.join(format!("group-global.{g:05}")))
            .collect();
        let stats = self.merge_pass(&group_files, Some(&group_maps[..]), &mut |word: &str, ext: bool| {
            assign_global(meta, callback, word, ext)
        })?;
        total.runs = stats.runs;
        total.order_violations += stats.order_violations;

        // Compose batch -> group -> global.
        for (g, group_map) in group_maps.iter().enumerate() {
            let to_global = dense_map(&IdMapReader::open(group_map)?)?;
            let first_batch = g * group_size;
            for batch in first_batch..first_batch + groups[g].len() {
                let stage_one = IdMapReader::open(&stage_one_maps[batch])?;
                let mut out = IdMapWriter::create(&map_paths[batch], stage_one.len() as u64)?;
                for (local, group_id) in stage_one.iter() {
                    let global = group_id
                        .vocab_index()
                        .and_then(|i| to_global.get(i as usize).copied())
                        .ok_or_else(|| {
                            IndexBuildError::Corrupt(format!(
                                "group {g}: group-local id {group_id:?} missing from stage two map"
                            ))
                        })?;
                    out.append(local, global)?;
                }
                out.finish()?;
                drop(stage_one);
                remove_intermediate(&stage_one_maps[batch])?;
            }
            remove_intermediate(group_map)?;
        }
        for path in &group_files {
            remove_intermediate(path)?;
        }
        Ok(total)
    }

    /// One k-way pass over `inputs`. `assign` is called once per run with the
    /// merged external flag and returns the id every occurrence maps to.
    fn merge_pass(
        &self,
        inputs: &[PathBuf],
        map_paths: Option<&[PathBuf]>,
        assign: &mut dyn FnMut(&str, bool) -> Result<Id>,
    ) -> Result<PassStats> {
        merge_pass_with(
            self.comparator,
            &self.options,
            inputs,
            map_paths,
            assign,
        )
    }
}

/// Assign the final id of a merged run.
fn assign_global(
    meta: &mut VocabularyMetaData,
    callback: &mut dyn WordCallback,
    word: &str,
    is_external: bool,
) -> Result<Id> {
    if is_blank_node_word(word) {
        return Ok(meta.next_blank_node());
    }
    let id = meta.add_word(word);
    let stored = callback.push_word(word, is_external)?;
    if stored != id.payload() {
        return Err(IndexBuildError::StoredIndexMismatch {
            expected: id.payload(),
            actual: stored,
        });
    }
    Ok(id)
}

/// A run of equal words across inputs.
struct Run {
    word: String,
    is_external: bool,
    /// `(input index, local id)`
    occurrences: Vec<(usize, u64)>,
}

fn merge_pass_with(
    comparator: &dyn WordComparator,
    options: &MergeOptions,
    inputs: &[PathBuf],
    map_paths: Option<&[PathBuf]>,
    assign: &mut dyn FnMut(&str, bool) -> Result<Id>,
) -> Result<PassStats> {
    let mut readers = Vec::with_capacity(inputs.len());
    let mut maps = Vec::new();
    for (i, path) in inputs.iter().enumerate() {
        let reader = PrefetchingVocabReader::open(path, options.read_ahead_words)?;
        if let Some(paths) = map_paths {
            maps.push(IdMapWriter::create(&paths[i], reader.num_records())?);
        }
        readers.push(reader);
    }
    let mut map_buffer = map_paths.map(|_| DoubleBufferedMaps::new(maps));

    let mut merge = KWayMerge::new(readers, |a: &PartialVocabEntry, b: &PartialVocabEntry| {
        word_order(comparator, &a.word, &b.word)
    })?;

    let mut stats = PassStats::default();
    let mut current: Option<Run> = None;
    while let Some((entry, src)) = merge.next_with_source()? {
        stats.input_entries += 1;
        if let Some(run) = current.as_mut().filter(|r| r.word == entry.word) {
            run.is_external |= entry.is_external;
            run.occurrences.push((src, entry.local_id));
            continue;
        }
        if let Some(prev) = current.take() {
            if word_order(comparator, &prev.word, &entry.word) != Ordering::Less {
                stats.order_violations += 1;
                if options.strict_order {
                    return Err(IndexBuildError::VocabularyOrder {
                        previous: prev.word,
                        next: entry.word,
                    });
                }
                tracing::warn!(
                    previous = %prev.word,
                    next = %entry.word,
                    "vocabulary merge: words are not in comparator order"
                );
            }
            emit_run(prev, assign, map_buffer.as_mut())?;
            stats.runs += 1;
        }
        current = Some(Run {
            word: entry.word,
            is_external: entry.is_external,
            occurrences: vec![(src, entry.local_id)],
        });
    }
    if let Some(last) = current.take() {
        emit_run(last, assign, map_buffer.as_mut())?;
        stats.runs += 1;
    }

    if let Some(buffer) = map_buffer {
        buffer.finish()?;
    }
    Ok(stats)
}

fn emit_run(
    run: Run,
    assign: &mut dyn FnMut(&str, bool) -> Result<Id>,
    maps: Option<&mut DoubleBufferedMaps>,
) -> Result<()> {
    let id = assign(&run.word, run.is_external)?;
    if let Some(maps) = maps {
        for (input, local) in run.occurrences {
            maps.push(input, local, id)?;
        }
    }
    Ok(())
}

// ============================================================================
// Double-buffered map writing
// ============================================================================

type MapEntry = (usize, u64, Id);
type FlushOutput = (Vec<IdMapWriter>, Vec<MapEntry>);

/// Map writers plus a fill buffer. While one full buffer is written by a
/// background thread (which owns the writers for that time), the merge
/// fills the other.
struct DoubleBufferedMaps {
    writers: Option<Vec<IdMapWriter>>,
    buffer: Vec<MapEntry>,
    spare: Option<Vec<MapEntry>>,
    pending: Option<std::thread::JoinHandle<Result<FlushOutput>>>,
}

impl DoubleBufferedMaps {
    fn new(writers: Vec<IdMapWriter>) -> Self {
        Self {
            writers: Some(writers),
            buffer: Vec::with_capacity(MAP_WRITE_BUFFER_ENTRIES),
            spare: None,
            pending: None,
        }
    }

    #[inline]
    fn push(&mut self, input: usize, local: u64, id: Id) -> Result<()> {
        self.buffer.push((input, local, id));
        if self.buffer.len() >= MAP_WRITE_BUFFER_ENTRIES {
            self.flush()?;
        }
        Ok(())
    }

    fn join_pending(&mut self) -> Result<()> {
        if let Some(handle) = self.pending.take() {
            let (writers, mut spare) = join_worker(handle, "id map writer")?;
            spare.clear();
            self.writers = Some(writers);
            self.spare = Some(spare);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.join_pending()?;
        let next = self
            .spare
            .take()
            .unwrap_or_else(|| Vec::with_capacity(MAP_WRITE_BUFFER_ENTRIES));
        let full = std::mem::replace(&mut self.buffer, next);
        let mut writers = self
            .writers
            .take()
            .ok_or_else(|| IndexBuildError::WorkerPanicked("id map writers lost".into()))?;
        self.pending = Some(
            std::thread::Builder::new()
                .name("idmap-writer".into())
                .spawn(move || -> Result<FlushOutput> {
                    for &(input, local, id) in &full {
                        writers[input].append(local, id)?;
                    }
                    Ok((writers, full))
                })?,
        );
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.flush()?;
        self.join_pending()?;
        if let Some(writers) = self.writers.take() {
            for w in writers {
                w.finish()?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Dense `group-local -> global` table from a stage-two map.
fn dense_map(reader: &IdMapReader) -> Result<Vec<Id>> {
    let mut out = vec![Id::UNDEFINED; reader.len()];
    for (local, global) in reader.iter() {
        let slot = out.get_mut(local as usize).ok_or_else(|| {
            IndexBuildError::Corrupt(format!(
                "stage two map: local id {local} outside 0..{}",
                reader.len()
            ))
        })?;
        *slot = global;
    }
    Ok(out)
}

fn remove_intermediate(path: &Path) -> Result<()> {
    std::fs::remove_file(path).map_err(|source| IndexBuildError::TempFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge byte-ordered partial files of internal words into one candidate
/// file for prefix compression. Returns the number of distinct words.
pub fn merge_prefix_candidates(
    inputs: &[PathBuf],
    out: &Path,
    read_ahead_words: usize,
) -> Result<u64> {
    let options = MergeOptions {
        max_files_for_direct_merge: usize::MAX,
        read_ahead_words,
        strict_order: false,
    };
    let mut writer = PartialVocabWriter::create(out)?;
    merge_pass_with(&ByteOrder, &options, inputs, None, &mut |word: &str, _ext: bool| {
        let id = writer.count();
        writer.write_entry(word, false, id)?;
        Ok(Id::vocab(id))
    })?;
    Ok(writer.finish()?)
}
