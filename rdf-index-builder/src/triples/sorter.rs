//! External sorter for [`IdTriple`]s.
//!
//! Rows are buffered up to a byte budget. A full buffer is handed to a
//! background thread that sorts it (in parallel) by the target permutation
//! and writes it as one spool run; at most one flush is in flight, the next
//! flush joins the previous one first. [`ExternalSorter::finish`] merges the
//! runs into one sorted, exact-duplicate-free stream.

use std::cmp::Ordering;
use std::io;
use std::path::PathBuf;

use rayon::slice::ParallelSliceMut;
use rdf_index_core::Permutation;

use super::id_triple::{cmp_for_permutation, IdTriple, RECORD_WIRE_SIZE};
use super::spool::{SpoolFileInfo, SpoolOptions, SpoolReader, SpoolWriter};
use crate::kway::KWayMerge;

/// Configuration for an [`ExternalSorter`].
#[derive(Debug, Clone)]
pub struct SorterConfig {
    /// Directory for run files.
    pub run_dir: PathBuf,
    pub permutation: Permutation,
    /// Memory budget of the run buffer.
    pub budget_bytes: usize,
    pub spool: SpoolOptions,
    /// Leave run files on disk after the sorted stream is dropped.
    pub keep_runs: bool,
}

impl SorterConfig {
    pub fn max_records(&self) -> usize {
        (self.budget_bytes / std::mem::size_of::<IdTriple>()).max(1)
    }
}

/// Result of a background run flush.
struct FlushResult {
    info: SpoolFileInfo,
    buffer: Vec<IdTriple>,
}

/// Sorts an unbounded stream of triples through disk runs.
pub struct ExternalSorter {
    config: SorterConfig,
    buffer: Vec<IdTriple>,
    spare_buffer: Option<Vec<IdTriple>>,
    runs: Vec<SpoolFileInfo>,
    pending_flush: Option<std::thread::JoinHandle<io::Result<FlushResult>>>,
    total_records: u64,
}

impl ExternalSorter {
    pub fn new(config: SorterConfig) -> io::Result<Self> {
        std::fs::create_dir_all(&config.run_dir)?;
        tracing::debug!(
            permutation = config.permutation.name(),
            budget_mb = config.budget_bytes / (1024 * 1024),
            max_records = config.max_records(),
            "external sorter created"
        );
        Ok(Self {
            buffer: Vec::with_capacity(config.max_records().min(1_000_000)),
            config,
            spare_buffer: None,
            runs: Vec::new(),
            pending_flush: None,
            total_records: 0,
        })
    }

    /// Append one row. Flushes a run when the buffer is full.
    pub fn push(&mut self, record: IdTriple) -> io::Result<()> {
        self.buffer.push(record);
        self.total_records += 1;
        if self.buffer.len() >= self.config.max_records() {
            self.flush_buffer()?;
        }
        Ok(())
    }

    pub fn push_all(&mut self, records: &[IdTriple]) -> io::Result<()> {
        records.iter().try_for_each(|r| self.push(*r))
    }

    fn join_pending_flush(&mut self) -> io::Result<()> {
        if let Some(handle) = self.pending_flush.take() {
            let result = handle
                .join()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "sorter flush thread panicked"))??;
            self.runs.push(result.info);
            self.spare_buffer = Some(result.buffer);
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.join_pending_flush()?;

        let reuse_capacity = self.config.max_records().min(1_000_000);
        let run_index = self.runs.len();
        let run_path = self.config.run_dir.join(format!(
            "run_{}_{:05}.spool",
            self.config.permutation.name(),
            run_index
        ));
        let perm = self.config.permutation;
        let options = self.config.spool;
        let full_buffer = std::mem::replace(
            &mut self.buffer,
            self.spare_buffer
                .take()
                .unwrap_or_else(|| Vec::with_capacity(reuse_capacity)),
        );

        self.pending_flush = Some(
            std::thread::Builder::new()
                .name(format!("sort-{}", perm.name()))
                .spawn(move || {
                    let mut buf = full_buffer;
                    let sort_start = std::time::Instant::now();
                    buf.par_sort_unstable_by(|a, b| cmp_for_permutation(perm, a, b));
                    let sort_elapsed = sort_start.elapsed();

                    let mut writer = SpoolWriter::create(&run_path, options)?;
                    writer.push_all(&buf)?;
                    let info = writer.finish()?;
                    tracing::debug!(
                        run = run_index,
                        records = info.record_count,
                        file_mb = info.byte_len as f64 / (1024.0 * 1024.0),
                        sort_ms = sort_elapsed.as_millis(),
                        "sorter run flushed"
                    );
                    drop(buf);
                    Ok(FlushResult {
                        info,
                        buffer: Vec::with_capacity(reuse_capacity),
                    })
                })?,
        );
        Ok(())
    }

    /// Flush the remaining rows and open the merged stream.
    pub fn finish(mut self) -> io::Result<SortedTriples> {
        self.flush_buffer()?;
        self.join_pending_flush()?;

        let perm = self.config.permutation;
        let readers = self
            .runs
            .iter()
            .map(|r| SpoolReader::open(&r.path))
            .collect::<io::Result<Vec<_>>>()?;
        let cmp: TripleCmp = Box::new(move |a, b| cmp_for_permutation(perm, a, b));
        tracing::info!(
            permutation = perm.name(),
            records = self.total_records,
            runs = self.runs.len(),
            spill_mb = self.total_records as f64 * RECORD_WIRE_SIZE as f64 / (1024.0 * 1024.0),
            "external sort runs complete"
        );
        Ok(SortedTriples {
            merge: KWayMerge::new(readers, cmp)?,
            run_paths: self.runs.into_iter().map(|r| r.path).collect(),
            keep_runs: self.config.keep_runs,
            permutation: perm,
        })
    }

    pub fn total_records(&self) -> u64 {
        self.total_records
    }
}

type TripleCmp = Box<dyn Fn(&IdTriple, &IdTriple) -> Ordering + Send>;

/// Sorted, duplicate-free stream over the runs of an [`ExternalSorter`].
/// Deletes its run files when dropped, unless configured to keep them.
pub struct SortedTriples {
    merge: KWayMerge<SpoolReader, TripleCmp>,
    run_paths: Vec<PathBuf>,
    keep_runs: bool,
    permutation: Permutation,
}

impl SortedTriples {
    pub fn permutation(&self) -> Permutation {
        self.permutation
    }
}

impl Iterator for SortedTriples {
    type Item = io::Result<IdTriple>;

    fn next(&mut self) -> Option<Self::Item> {
        self.merge.next_deduped().transpose()
    }
}

impl Drop for SortedTriples {
    fn drop(&mut self) {
        if self.keep_runs {
            return;
        }
        for path in &self.run_paths {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove sorter run");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdf_index_core::Id;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("rdf_index_sorter_tests")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config(dir: PathBuf, perm: Permutation, budget_rows: usize) -> SorterConfig {
        SorterConfig {
            run_dir: dir,
            permutation: perm,
            budget_bytes: budget_rows * std::mem::size_of::<IdTriple>(),
            spool: SpoolOptions::default(),
            keep_runs: false,
        }
    }

    fn t(s: u64, p: u64, o: u64) -> IdTriple {
        IdTriple::new(Id::vocab(s), Id::vocab(p), Id::vocab(o), Id::vocab(0))
    }

    #[test]
    fn test_multi_run_sort_and_dedup() {
        let dir = temp_dir("multi_run");
        let mut sorter = ExternalSorter::new(config(dir.clone(), Permutation::Pos, 7)).unwrap();
        let mut expected = Vec::new();
        for i in 0..100u64 {
            let rec = t(i % 13, i % 3, (i * 7) % 11);
            sorter.push(rec).unwrap();
            expected.push(rec);
        }
        // exact duplicates collapse
        sorter.push(t(0, 0, 0)).unwrap();
        expected.push(t(0, 0, 0));

        expected.sort_by(|a, b| cmp_for_permutation(Permutation::Pos, a, b));
        expected.dedup();

        let sorted = sorter.finish().unwrap();
        let got: Vec<IdTriple> = sorted.collect::<io::Result<_>>().unwrap();
        assert_eq!(got, expected);
        // runs removed on drop
        let leftover = std::fs::read_dir(&dir).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn test_empty_sorter() {
        let dir = temp_dir("empty");
        let sorter = ExternalSorter::new(config(dir, Permutation::Spo, 10)).unwrap();
        let mut sorted = sorter.finish().unwrap();
        assert!(sorted.next().is_none());
    }

    #[test]
    fn test_keep_runs() {
        let dir = temp_dir("keep");
        let mut cfg = config(dir.clone(), Permutation::Spo, 2);
        cfg.keep_runs = true;
        let mut sorter = ExternalSorter::new(cfg).unwrap();
        for i in 0..5 {
            sorter.push(t(5 - i, 0, 0)).unwrap();
        }
        let sorted = sorter.finish().unwrap();
        let got: Vec<IdTriple> = sorted.collect::<io::Result<_>>().unwrap();
        assert_eq!(got.first().copied(), Some(t(1, 0, 0)));
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 3);
    }
}
