//! Batch-local to global id rewrite.
//!
//! Streams the batch-ordered spool one batch at a time. For each batch the
//! `idmap.NNNNN` file written by the global merge is loaded into a hash map,
//! windows of rows are rewritten in parallel on a dedicated rayon pool, and
//! the rewritten blocks are sent, in spool order, to a single consumer thread
//! that owns the external sorter.
//!
//! Every vocabulary column must resolve. A miss means the merge and the
//! batch disagree and aborts with [`IndexBuildError::MissingGlobalId`].

use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::Instant;

use rayon::prelude::*;
use rdf_index_core::Id;
use rustc_hash::FxHashMap;

use crate::error::{join_worker, IndexBuildError, Result};
use crate::triples::{ExternalSorter, IdTriple, SpoolReader};
use crate::vocab::id_map::{id_map_file_name, IdMapReader};

/// Settings of the rewrite stage.
#[derive(Debug, Clone)]
pub struct RewriteOptions {
    /// Directory holding `idmap.NNNNN`.
    pub map_dir: PathBuf,
    pub threads: usize,
    /// Rows per parallel lookup task.
    pub block_rows: usize,
    /// Leave the map files in place after use.
    pub keep_maps: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RewriteStats {
    pub batches: usize,
    pub triples: u64,
}

/// Rewrite the spool at `spool` into `sorter`.
///
/// `batch_sizes[b]` is the number of rows batch `b` occupies in the spool.
/// Returns the sorter with every row pushed, in spool order.
pub fn rewrite_into_sorter(
    spool: &Path,
    batch_sizes: &[u64],
    options: &RewriteOptions,
    sorter: ExternalSorter,
) -> Result<(ExternalSorter, RewriteStats)> {
    let _span = tracing::info_span!("id_rewrite", batches = batch_sizes.len()).entered();
    let start = Instant::now();

    let mut reader = SpoolReader::open(spool)?;
    let expected: u64 = batch_sizes.iter().sum();
    if reader.remaining() != expected {
        return Err(IndexBuildError::Corrupt(format!(
            "spool {} holds {} rows, batches account for {expected}",
            spool.display(),
            reader.remaining()
        )));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads)
        .thread_name(|i| format!("id-rewrite-{i}"))
        .build()
        .map_err(|e| IndexBuildError::InvalidConfig(format!("rewrite pool: {e}")))?;

    let (tx, rx) = sync_channel::<Vec<IdTriple>>(2);
    let consumer = std::thread::Builder::new()
        .name("rewrite-sorter".into())
        .spawn(move || consume_blocks(rx, sorter))?;

    let produced = produce_blocks(&mut reader, batch_sizes, options, &pool, tx);
    // The sender is gone by now, so the consumer drains and returns.
    let consumed = join_worker(consumer, "rewrite sorter consumer");
    let stats = produced?;
    let sorter = consumed?;

    tracing::info!(
        batches = stats.batches,
        triples = stats.triples,
        elapsed_ms = start.elapsed().as_millis(),
        "id rewrite complete"
    );
    Ok((sorter, stats))
}

fn consume_blocks(rx: Receiver<Vec<IdTriple>>, mut sorter: ExternalSorter) -> Result<ExternalSorter> {
    while let Ok(block) = rx.recv() {
        sorter.push_all(&block)?;
    }
    Ok(sorter)
}

fn produce_blocks(
    reader: &mut SpoolReader,
    batch_sizes: &[u64],
    options: &RewriteOptions,
    pool: &rayon::ThreadPool,
    tx: SyncSender<Vec<IdTriple>>,
) -> Result<RewriteStats> {
    let window = options.block_rows.saturating_mul(options.threads).max(1);
    let mut stats = RewriteStats::default();

    for (batch, &rows) in batch_sizes.iter().enumerate() {
        let map_path = options.map_dir.join(id_map_file_name(batch));
        let map = load_batch_map(&map_path, rows)?;

        let mut left = rows;
        while left > 0 {
            let mut block = reader.read_chunk(window.min(left as usize))?;
            if block.is_empty() {
                return Err(IndexBuildError::Corrupt(format!(
                    "spool ended inside batch {batch}"
                )));
            }
            left -= block.len() as u64;
            pool.install(|| {
                block
                    .par_chunks_mut(options.block_rows)
                    .try_for_each(|chunk| rewrite_block(batch, chunk, &map))
            })?;
            stats.triples += block.len() as u64;
            if tx.send(block).is_err() {
                // The consumer failed; its error surfaces when it is joined.
                return Ok(stats);
            }
        }

        tracing::debug!(batch, rows, map_entries = map.len(), "batch rewritten");
        stats.batches += 1;
        drop(map);
        if !options.keep_maps && map_path.exists() {
            std::fs::remove_file(&map_path).map_err(|source| IndexBuildError::TempFile {
                path: map_path.clone(),
                source,
            })?;
        }
    }
    Ok(stats)
}

/// A batch without rows may have no map file at all.
fn load_batch_map(path: &Path, rows: u64) -> Result<FxHashMap<u64, Id>> {
    if rows == 0 && !path.exists() {
        return Ok(FxHashMap::default());
    }
    Ok(IdMapReader::open(path)?.load_hash_map()?)
}

/// Replace every batch-local vocabulary id in `rows` by its global id.
pub fn rewrite_block(batch: usize, rows: &mut [IdTriple], map: &FxHashMap<u64, Id>) -> Result<()> {
    for row in rows {
        for col in row.columns_mut() {
            if let Some(local) = col.vocab_index() {
                *col = *map.get(&local).ok_or(IndexBuildError::MissingGlobalId {
                    batch,
                    local_id: local,
                })?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triples::{BatchSpool, SorterConfig, SpoolOptions};
    use crate::vocab::id_map::IdMapWriter;
    use rdf_index_core::Permutation;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rdf_index_rewrite_tests").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_map(dir: &Path, batch: usize, pairs: &[(u64, Id)]) {
        let mut w = IdMapWriter::create(dir.join(id_map_file_name(batch)), pairs.len() as u64).unwrap();
        for &(local, global) in pairs {
            w.append(local, global).unwrap();
        }
        w.finish().unwrap();
    }

    fn t(s: u64, p: u64, o: u64) -> IdTriple {
        IdTriple::new(Id::vocab(s), Id::vocab(p), Id::vocab(o), Id::vocab(0))
    }

    fn spool(dir: &Path, batches: Vec<Vec<IdTriple>>) -> (PathBuf, Vec<u64>) {
        use crate::triples::BatchSink;
        let path = dir.join("triples.spool");
        let mut sp = BatchSpool::create(&path, SpoolOptions::default()).unwrap();
        for (b, rows) in batches.into_iter().enumerate() {
            sp.append_batch(b, rows).unwrap();
        }
        let (info, sizes) = sp.finish().unwrap();
        (info.path, sizes)
    }

    fn sorter(dir: &Path) -> ExternalSorter {
        ExternalSorter::new(SorterConfig {
            run_dir: dir.join("runs"),
            permutation: Permutation::Spo,
            budget_bytes: 4 * std::mem::size_of::<IdTriple>(),
            spool: SpoolOptions::default(),
            keep_runs: false,
        })
        .unwrap()
    }

    fn options(dir: &Path, keep: bool) -> RewriteOptions {
        RewriteOptions {
            map_dir: dir.to_path_buf(),
            threads: 2,
            block_rows: 2,
            keep_maps: keep,
        }
    }

    #[test]
    fn test_rewrite_changes_only_ids() {
        let dir = temp_dir("round_trip");
        // batch 0 words: 0->10, 1->11, 2->12 ; batch 1 words: 0->11, 1->13
        write_map(&dir, 0, &[(0, Id::vocab(10)), (1, Id::vocab(11)), (2, Id::vocab(12))]);
        write_map(&dir, 1, &[(0, Id::vocab(11)), (1, Id::blank_node(0))]);
        let mut with_payload = t(0, 1, 0);
        with_payload.payload = Id::int(7);
        let (path, sizes) = spool(
            &dir,
            vec![vec![t(2, 1, 0), with_payload, t(1, 1, 2)], vec![t(0, 0, 1)]],
        );

        let (sorter, stats) =
            rewrite_into_sorter(&path, &sizes, &options(&dir, false), sorter(&dir)).unwrap();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.triples, 4);
        assert!(!dir.join(id_map_file_name(0)).exists());

        let rows: Vec<IdTriple> = sorter.finish().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);
        let mut expected = vec![
            IdTriple::new(Id::vocab(12), Id::vocab(11), Id::vocab(10), Id::vocab(10)),
            IdTriple::with_payload(Id::vocab(10), Id::vocab(11), Id::vocab(10), Id::vocab(10), Id::int(7)),
            IdTriple::new(Id::vocab(11), Id::vocab(11), Id::vocab(12), Id::vocab(10)),
            IdTriple::new(Id::vocab(11), Id::vocab(11), Id::blank_node(0), Id::vocab(11)),
        ];
        expected.sort_by(|a, b| crate::triples::cmp_for_permutation(Permutation::Spo, a, b));
        assert_eq!(rows, expected);
    }

    #[test]
    fn test_keep_maps_and_many_windows() {
        let dir = temp_dir("keep_maps");
        let pairs: Vec<(u64, Id)> = (0..50).map(|i| (i, Id::vocab(100 + i))).collect();
        write_map(&dir, 0, &pairs);
        let rows: Vec<IdTriple> = (0..50).rev().map(|i| t(i, i, i)).collect();
        let (path, sizes) = spool(&dir, vec![rows]);

        let (sorter, stats) =
            rewrite_into_sorter(&path, &sizes, &options(&dir, true), sorter(&dir)).unwrap();
        assert_eq!(stats.triples, 50);
        assert_eq!(sorter.total_records(), 50);
        assert!(dir.join(id_map_file_name(0)).exists());
        let rows: Vec<IdTriple> = sorter.finish().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(rows.first().unwrap().s, Id::vocab(100));
        assert_eq!(rows.last().unwrap().o, Id::vocab(149));
    }

    #[test]
    fn test_rewrite_block_leaves_non_vocab_columns() {
        let mut map = FxHashMap::default();
        map.insert(0, Id::vocab(9));
        let mut rows = vec![IdTriple::with_payload(
            Id::vocab(0),
            Id::vocab(0),
            Id::int(3),
            Id::vocab(0),
            Id::int(2),
        )];
        rewrite_block(0, &mut rows, &map).unwrap();
        assert_eq!(rows[0].o, Id::int(3));
        assert_eq!(rows[0].payload, Id::int(2));
        assert_eq!(rows[0].s, Id::vocab(9));
    }

    #[test]
    fn test_missing_global_id_is_fatal() {
        let dir = temp_dir("missing");
        write_map(&dir, 0, &[(0, Id::vocab(5))]);
        let (path, sizes) = spool(&dir, vec![vec![t(0, 0, 3)]]);
        let err = rewrite_into_sorter(&path, &sizes, &options(&dir, false), sorter(&dir))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            IndexBuildError::MissingGlobalId { batch: 0, local_id: 3 }
        ));
    }

    #[test]
    fn test_batch_size_mismatch() {
        let dir = temp_dir("mismatch");
        write_map(&dir, 0, &[(0, Id::vocab(0))]);
        let (path, _) = spool(&dir, vec![vec![t(0, 0, 0)]]);
        let err = rewrite_into_sorter(&path, &[2], &options(&dir, false), sorter(&dir))
            .err()
            .unwrap();
        assert!(matches!(err, IndexBuildError::Corrupt(_)));
    }
}
