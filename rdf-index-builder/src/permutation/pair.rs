//! Twin permutation pair builder.
//!
//! Consumes a stream sorted by the primary permutation and writes the
//! primary and its twin (last two key columns swapped) side by side. Both
//! files lead with the same column, so a relation occupies the same row
//! positions in both. The primary is cut into blocks by uncompressed bytes;
//! the twin rows of each relation are sorted as a whole (through an
//! [`ExternalSorter`] once the relation outgrows the memory budget) and cut
//! with the same row counts. Both files therefore have identical block
//! boundaries and are each globally sorted.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

use rayon::prelude::*;
use rdf_index_core::{Id, Permutation};
use rustc_hash::FxHashSet;
use serde::Serialize;

use super::block::{encode_block, Row, ROW_BYTES};
use super::file::{PermutationFileInfo, PermutationFileWriter, RelationMetadata};
use crate::config::DEFAULT_SORT_BUDGET_BYTES;
use crate::error::{IndexBuildError, Result};
use crate::triples::{ExternalSorter, IdTriple, SorterConfig, SpoolOptions};

#[derive(Debug, Clone)]
pub struct PairOptions {
    pub out_dir: PathBuf,
    pub block_uncompressed_bytes: usize,
    pub zstd_level: i32,
    /// Run directory for twin relations larger than `sort_budget_bytes`.
    pub spill_dir: PathBuf,
    pub sort_budget_bytes: usize,
    pub spool: SpoolOptions,
}

impl PairOptions {
    /// Options spilling to `<out_dir>/twin-sort` with the default budget.
    pub fn new(out_dir: PathBuf, block_uncompressed_bytes: usize, zstd_level: i32) -> Self {
        Self {
            spill_dir: out_dir.join("twin-sort"),
            out_dir,
            block_uncompressed_bytes,
            zstd_level,
            sort_budget_bytes: DEFAULT_SORT_BUDGET_BYTES,
            spool: SpoolOptions::default(),
        }
    }

    pub fn rows_per_block(&self) -> usize {
        (self.block_uncompressed_bytes / ROW_BYTES).max(1)
    }

    /// Twin rows of one relation held in memory before spilling.
    fn relation_memory_rows(&self) -> usize {
        (self.sort_budget_bytes / std::mem::size_of::<IdTriple>()).max(1)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PairInfo {
    pub primary: PermutationFileInfo,
    pub twin: PermutationFileInfo,
    pub num_blocks: usize,
    pub num_rows: u64,
}

/// Row consumers of one pass.
pub struct PairCallbacks<'a> {
    /// Receives every row, for the next pair's sort.
    pub next_sorter: Option<&'a mut ExternalSorter>,
    /// Tells whether an id belongs to the builder's own vocabulary range.
    pub is_internal: &'a dyn Fn(Id) -> bool,
    /// Called for every row without internal ids, in primary order.
    pub on_row: &'a mut dyn FnMut(&IdTriple),
}

/// Build the pair `(primary, primary.twin())` from `sorted`.
///
/// `sorted` must be ordered by `primary`; an out-of-order row is an error.
/// Exact duplicate rows are written once.
pub fn build_permutation_pair<I>(
    sorted: I,
    primary: Permutation,
    options: &PairOptions,
    callbacks: PairCallbacks<'_>,
) -> Result<PairInfo>
where
    I: Iterator<Item = io::Result<IdTriple>>,
{
    let twin = primary.twin();
    let _span = tracing::info_span!("permutation_pair", primary = primary.name(), twin = twin.name())
        .entered();
    let start = Instant::now();
    std::fs::create_dir_all(&options.out_dir)?;

    let PairCallbacks {
        mut next_sorter,
        is_internal,
        on_row,
    } = callbacks;

    let mut writer = PairWriter {
        primary: PermutationFileWriter::create(&options.out_dir, primary, options.zstd_level)?,
        twin: PermutationFileWriter::create(&options.out_dir, twin, options.zstd_level)?,
        twin_permutation: twin,
        zstd_level: options.zstd_level,
        relation: None,
        relation_twin: TwinRows::Memory(Vec::new()),
        relation_memory_rows: options.relation_memory_rows(),
        options,
        ready_twin: VecDeque::new(),
        pending_block_rows: VecDeque::new(),
        spilled_relations: 0,
    };
    let block_rows = options.rows_per_block();
    let mut block: Vec<Row> = Vec::with_capacity(block_rows.min(1 << 20));
    let mut prev: Option<Row> = None;
    let mut num_rows = 0u64;

    for item in sorted {
        let triple = item?;
        let row = triple.permuted(primary);
        if let Some(p) = prev {
            if p > row {
                return Err(IndexBuildError::Corrupt(format!(
                    "{} input out of order: {:?} after {:?}",
                    primary.name(),
                    row,
                    p
                )));
            }
            if p == row {
                continue;
            }
        }
        prev = Some(row);

        if let Some(sorter) = next_sorter.as_deref_mut() {
            sorter.push(triple)?;
        }
        if ![triple.s, triple.p, triple.o].into_iter().any(is_internal) {
            on_row(&triple);
        }

        writer.add_row(&row, triple)?;
        block.push(row);
        num_rows += 1;
        if block.len() >= block_rows {
            writer.flush_block(&block)?;
            block.clear();
        }
    }
    writer.close_relation()?;
    if !block.is_empty() {
        writer.flush_block(&block)?;
    }

    let num_blocks = writer.primary.num_blocks();
    if writer.twin.num_blocks() != num_blocks || !writer.ready_twin.is_empty() {
        return Err(IndexBuildError::Corrupt(format!(
            "twin has {} blocks and {} unwritten rows, primary has {num_blocks} blocks",
            writer.twin.num_blocks(),
            writer.ready_twin.len()
        )));
    }
    let spilled_relations = writer.spilled_relations;
    let primary_info = writer.primary.finish()?;
    let twin_info = writer.twin.finish()?;

    tracing::info!(
        primary = primary.name(),
        twin = twin.name(),
        blocks = num_blocks,
        rows = num_rows,
        spilled_relations,
        bytes = primary_info.file_bytes + twin_info.file_bytes,
        elapsed_ms = start.elapsed().as_millis(),
        "permutation pair written"
    );
    Ok(PairInfo {
        primary: primary_info,
        twin: twin_info,
        num_blocks,
        num_rows,
    })
}

/// Relation being accumulated across blocks.
struct OpenRelation {
    key: Id,
    first_block: u32,
    last_block: u32,
    num_rows: u64,
    last_col1: Id,
    distinct_col1: u64,
    col2: FxHashSet<Id>,
}

impl OpenRelation {
    fn new(row: &Row, block: u32) -> Self {
        Self {
            key: row[0],
            first_block: block,
            last_block: block,
            num_rows: 0,
            last_col1: row[1],
            distinct_col1: 1,
            col2: FxHashSet::default(),
        }
    }

    fn add(&mut self, row: &Row, block: u32) {
        if self.num_rows > 0 && row[1] != self.last_col1 {
            self.distinct_col1 += 1;
            self.last_col1 = row[1];
        }
        self.col2.insert(row[2]);
        self.num_rows += 1;
        self.last_block = block;
    }

    fn finish(self) -> RelationMetadata {
        let rows = self.num_rows as f64;
        RelationMetadata {
            key: self.key,
            first_block: self.first_block,
            last_block: self.last_block,
            num_rows: self.num_rows,
            multiplicity_col1: rows / self.distinct_col1.max(1) as f64,
            multiplicity_col2: rows / self.col2.len().max(1) as f64,
        }
    }
}

/// Twin rows of the open relation, not yet in twin order.
enum TwinRows {
    Memory(Vec<IdTriple>),
    Spilled(ExternalSorter, PathBuf),
}

struct PairWriter<'o> {
    primary: PermutationFileWriter,
    twin: PermutationFileWriter,
    twin_permutation: Permutation,
    zstd_level: i32,
    relation: Option<OpenRelation>,
    relation_twin: TwinRows,
    relation_memory_rows: usize,
    options: &'o PairOptions,
    /// Twin rows in final order, waiting for their block to be cut.
    ready_twin: VecDeque<Row>,
    /// Row counts of primary blocks whose twin block is not written yet.
    pending_block_rows: VecDeque<usize>,
    spilled_relations: u64,
}

impl PairWriter<'_> {
    fn add_row(&mut self, row: &Row, triple: IdTriple) -> Result<()> {
        let block_index = self.primary.num_blocks() as u32;
        if self.relation.as_ref().map(|r| r.key) != Some(row[0]) {
            self.close_relation()?;
            self.relation = Some(OpenRelation::new(row, block_index));
        }
        if let Some(rel) = self.relation.as_mut() {
            rel.add(row, block_index);
        }

        match &mut self.relation_twin {
            TwinRows::Spilled(sorter, _) => sorter.push(triple)?,
            TwinRows::Memory(rows) => {
                rows.push(triple);
                if rows.len() > self.relation_memory_rows {
                    let run_dir = self
                        .options
                        .spill_dir
                        .join(format!("relation-{:016x}", row[0].to_bits()));
                    let mut sorter = ExternalSorter::new(SorterConfig {
                        run_dir: run_dir.clone(),
                        permutation: self.twin_permutation,
                        budget_bytes: self.options.sort_budget_bytes,
                        spool: self.options.spool,
                        keep_runs: false,
                    })?;
                    sorter.push_all(rows)?;
                    tracing::debug!(
                        key = ?row[0],
                        rows = rows.len(),
                        "twin relation spilled to disk"
                    );
                    self.relation_twin = TwinRows::Spilled(sorter, run_dir);
                    self.spilled_relations += 1;
                }
            }
        }
        Ok(())
    }

    /// Record the open relation's metadata and move its twin rows, in twin
    /// order, to the ready queue.
    fn close_relation(&mut self) -> Result<()> {
        let Some(rel) = self.relation.take() else {
            return Ok(());
        };
        let meta = rel.finish();
        self.twin.add_relation(meta.for_twin());
        self.primary.add_relation(meta);

        let twin = self.twin_permutation;
        match std::mem::replace(&mut self.relation_twin, TwinRows::Memory(Vec::new())) {
            TwinRows::Memory(triples) => {
                let mut rows: Vec<Row> = triples.iter().map(|t| t.permuted(twin)).collect();
                rows.par_sort_unstable();
                self.ready_twin.extend(rows);
                self.relation_twin = TwinRows::Memory(reuse(triples));
                self.write_ready_twin_blocks()?;
            }
            TwinRows::Spilled(sorter, run_dir) => {
                for triple in sorter.finish()? {
                    self.ready_twin.push_back(triple?.permuted(twin));
                    self.write_ready_twin_blocks()?;
                }
                // Runs are gone once the stream drops; the spill dir may be shared.
                let _ = std::fs::remove_dir(&run_dir);
                let _ = std::fs::remove_dir(&self.options.spill_dir);
            }
        }
        Ok(())
    }

    fn flush_block(&mut self, rows: &[Row]) -> Result<()> {
        self.pending_block_rows.push_back(rows.len());
        let twin_blocks = self.take_ready_twin_blocks();
        let level = self.zstd_level;
        let (primary_data, twin_data) = rayon::join(
            || encode_block(rows, level),
            || encode_all(&twin_blocks, level),
        );
        self.primary.write_encoded(rows, &primary_data?)?;
        for (block, data) in twin_blocks.iter().zip(twin_data?) {
            self.twin.write_encoded(block, &data)?;
        }
        Ok(())
    }

    fn write_ready_twin_blocks(&mut self) -> Result<()> {
        let twin_blocks = self.take_ready_twin_blocks();
        if twin_blocks.is_empty() {
            return Ok(());
        }
        for (block, data) in twin_blocks.iter().zip(encode_all(&twin_blocks, self.zstd_level)?) {
            self.twin.write_encoded(block, &data)?;
        }
        Ok(())
    }

    /// Cut every twin block whose rows are all ready.
    fn take_ready_twin_blocks(&mut self) -> Vec<Vec<Row>> {
        let mut blocks = Vec::new();
        while let Some(&n) = self.pending_block_rows.front() {
            if self.ready_twin.len() < n {
                break;
            }
            self.pending_block_rows.pop_front();
            blocks.push(self.ready_twin.drain(..n).collect());
        }
        blocks
    }
}

fn encode_all(blocks: &[Vec<Row>], level: i32) -> io::Result<Vec<Vec<u8>>> {
    blocks.par_iter().map(|b| encode_block(b, level)).collect()
}

/// Empty `v`, keeping its allocation unless it grew large.
fn reuse(mut v: Vec<IdTriple>) -> Vec<IdTriple> {
    if v.capacity() > 1 << 16 {
        return Vec::new();
    }
    v.clear();
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permutation::file::PermutationReader;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("rdf_index_permutation_pair_tests")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn t(s: u64, p: u64, o: u64) -> IdTriple {
        IdTriple::new(Id::vocab(s), Id::vocab(p), Id::vocab(o), Id::vocab(0))
    }

    fn options(dir: PathBuf, rows: usize) -> PairOptions {
        PairOptions::new(dir, rows * ROW_BYTES, 1)
    }

    fn read_all(path: &std::path::Path) -> Vec<Vec<Row>> {
        let mut reader = PermutationReader::open(path).unwrap();
        (0..reader.num_blocks())
            .map(|b| reader.read_block(b).unwrap())
            .collect()
    }

    fn build(
        rows: Vec<IdTriple>,
        perm: Permutation,
        opts: &PairOptions,
        is_internal: &dyn Fn(Id) -> bool,
    ) -> (PairInfo, Vec<IdTriple>) {
        let mut seen = Vec::new();
        let mut on_row = |t: &IdTriple| seen.push(*t);
        let info = build_permutation_pair(
            rows.into_iter().map(Ok),
            perm,
            opts,
            PairCallbacks {
                next_sorter: None,
                is_internal,
                on_row: &mut on_row,
            },
        )
        .unwrap();
        (info, seen)
    }

    fn sorted(mut rows: Vec<IdTriple>, perm: Permutation) -> Vec<IdTriple> {
        rows.sort_by(|a, b| crate::triples::cmp_for_permutation(perm, a, b));
        rows
    }

    #[test]
    fn test_pair_blocks_aligned() {
        let dir = temp_dir("aligned");
        let input = sorted(
            (0..25).map(|i| t(i % 4, i % 3, i)).collect(),
            Permutation::Spo,
        );
        let (info, _) = build(input.clone(), Permutation::Spo, &options(dir, 4), &|_| false);
        assert_eq!(info.num_rows, 25);
        assert_eq!(info.num_blocks, 7);

        let q = PermutationReader::open(&info.twin.path).unwrap();
        assert_eq!(q.metadata().permutation, Permutation::Sop);
        let primary = read_all(&info.primary.path);
        let twin = read_all(&info.twin.path);
        assert_eq!(primary.len(), twin.len());
        for (p, q) in primary.iter().zip(&twin) {
            assert_eq!(p.len(), q.len());
            // Same leading key at every position.
            assert!(p.iter().zip(q).all(|(a, b)| a[0] == b[0]));
        }

        let mut expected: Vec<Row> = input.iter().map(|t| t.permuted(Permutation::Sop)).collect();
        expected.sort_unstable();
        assert_eq!(twin.concat(), expected);
    }

    #[test]
    fn test_twin_file_sorted_across_blocks() {
        let dir = temp_dir("twin_sorted");
        let rows = vec![t(1, 1, 9), t(1, 2, 8), t(1, 3, 7), t(1, 4, 6)];
        let (info, _) = build(rows, Permutation::Spo, &options(dir, 2), &|_| false);
        let twin = read_all(&info.twin.path);
        assert_eq!(twin.len(), 2);
        let objects: Vec<(Id, Id)> = twin.concat().iter().map(|r| (r[1], r[2])).collect();
        assert_eq!(
            objects,
            vec![
                (Id::vocab(6), Id::vocab(4)),
                (Id::vocab(7), Id::vocab(3)),
                (Id::vocab(8), Id::vocab(2)),
                (Id::vocab(9), Id::vocab(1)),
            ]
        );
        let q = PermutationReader::open(&info.twin.path).unwrap();
        let blocks = &q.metadata().blocks;
        assert!(blocks[0].last_row <= blocks[1].first_row);
    }

    #[test]
    fn test_large_twin_relation_spills() {
        let dir = temp_dir("spill");
        let mut opts = options(dir.clone(), 3);
        opts.sort_budget_bytes = 4 * std::mem::size_of::<IdTriple>();
        let input: Vec<IdTriple> = (0..20)
            .map(|i| t(1, i, 100 - i))
            .chain((0..5).map(|i| t(2, i, i)))
            .collect();
        let (info, _) = build(input.clone(), Permutation::Spo, &opts, &|_| false);
        assert_eq!(info.num_rows, 25);

        let twin = read_all(&info.twin.path);
        let sizes: Vec<usize> = twin.iter().map(Vec::len).collect();
        let primary_sizes: Vec<usize> = read_all(&info.primary.path).iter().map(Vec::len).collect();
        assert_eq!(sizes, primary_sizes);

        let mut expected: Vec<Row> = input.iter().map(|t| t.permuted(Permutation::Sop)).collect();
        expected.sort_unstable();
        assert_eq!(twin.concat(), expected);
        assert!(!opts.spill_dir.exists());
    }

    #[test]
    fn test_exact_duplicates_written_once() {
        let dir = temp_dir("duplicates");
        let rows = vec![t(1, 2, 3), t(1, 2, 3), t(1, 2, 4)];
        let (info, seen) = build(rows, Permutation::Spo, &options(dir, 4), &|_| false);
        assert_eq!(info.num_rows, 2);
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_relation_metadata() {
        let dir = temp_dir("relations");
        // key 1: col1 {1,1,2}, col2 {5,6,5}; key 2: one row
        let rows = vec![t(1, 1, 5), t(1, 1, 6), t(1, 2, 5), t(2, 9, 9)];
        let (info, _) = build(rows, Permutation::Spo, &options(dir, 2), &|_| false);
        let p = PermutationReader::open(&info.primary.path).unwrap();
        let q = PermutationReader::open(&info.twin.path).unwrap();
        let rel = p.metadata().relation(Id::vocab(1)).unwrap().clone();
        assert_eq!(rel.num_rows, 3);
        assert_eq!((rel.first_block, rel.last_block), (0, 1));
        assert!((rel.multiplicity_col1 - 1.5).abs() < 1e-9);
        assert!((rel.multiplicity_col2 - 1.5).abs() < 1e-9);
        let twin_rel = q.metadata().relation(Id::vocab(2)).unwrap();
        assert_eq!((twin_rel.first_block, twin_rel.last_block), (1, 1));
        assert_eq!(p.metadata().relations.len(), 2);
    }

    #[test]
    fn test_twin_relation_spanning_blocks_reads_sorted() {
        let dir = temp_dir("spanning");
        let rows = vec![t(1, 1, 9), t(1, 2, 8), t(1, 3, 7), t(1, 4, 6), t(1, 5, 5)];
        let (info, _) = build(rows, Permutation::Spo, &options(dir, 2), &|_| false);
        let mut q = PermutationReader::open(&info.twin.path).unwrap();
        let rel = q.read_relation(Id::vocab(1)).unwrap();
        let objects: Vec<Id> = rel.iter().map(|r| r[1]).collect();
        assert_eq!(objects, (5..=9).map(Id::vocab).collect::<Vec<_>>());
    }

    #[test]
    fn test_callback_skips_internal_rows() {
        let dir = temp_dir("internal");
        let rows = sorted(vec![t(1, 2, 3), t(1, 100, 3), t(4, 5, 6)], Permutation::Pso);
        let (info, seen) = build(rows, Permutation::Pso, &options(dir, 10), &|id| {
            id == Id::vocab(100)
        });
        assert_eq!(info.num_rows, 3);
        assert_eq!(seen, vec![t(1, 2, 3), t(4, 5, 6)]);
    }

    #[test]
    fn test_unsorted_input_rejected() {
        let dir = temp_dir("unsorted");
        let mut on_row = |_: &IdTriple| {};
        let err = build_permutation_pair(
            vec![Ok(t(2, 0, 0)), Ok(t(1, 0, 0))].into_iter(),
            Permutation::Spo,
            &options(dir, 4),
            PairCallbacks {
                next_sorter: None,
                is_internal: &|_| false,
                on_row: &mut on_row,
            },
        )
        .unwrap_err();
        assert!(matches!(err, IndexBuildError::Corrupt(_)));
    }

    #[test]
    fn test_empty_input() {
        let dir = temp_dir("empty");
        let (info, seen) = build(Vec::new(), Permutation::Osp, &options(dir, 4), &|_| false);
        assert_eq!(info.num_blocks, 0);
        assert_eq!(info.num_rows, 0);
        assert!(seen.is_empty());
        assert_eq!(info.twin.permutation, Permutation::Ops);
    }
}
