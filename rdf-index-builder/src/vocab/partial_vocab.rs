//! Partial-vocabulary file I/O.
//!
//! One file per batch, written by the partial-vocabulary writer and read once
//! by the global merge.
//!
//! ## Format (`partial-vocab.NNNNN`)
//!
//! ```text
//! count:        u64                     (number of records)
//! records, sorted by the word comparator, one per distinct word:
//!   word_len:     u32
//!   word_bytes:   [u8; word_len]        (UTF-8)
//!   is_external:  u8                    (0 or 1)
//!   local_id:     u64                   (batch-local id)
//! ```
//!
//! The count is written as a placeholder and patched by
//! [`PartialVocabWriter::finish`].

use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

const IO_BUFFER_BYTES: usize = 256 * 1024;

/// One record of a partial-vocabulary file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialVocabEntry {
    pub word: String,
    pub is_external: bool,
    pub local_id: u64,
}

// ============================================================================
// Writer
// ============================================================================

pub struct PartialVocabWriter {
    file: BufWriter<std::fs::File>,
    path: PathBuf,
    count: u64,
}

impl PartialVocabWriter {
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let mut file = BufWriter::with_capacity(IO_BUFFER_BYTES, std::fs::File::create(&path)?);
        file.write_all(&0u64.to_le_bytes())?; // placeholder count
        Ok(Self {
            file,
            path,
            count: 0,
        })
    }

    pub fn write_entry(&mut self, word: &str, is_external: bool, local_id: u64) -> io::Result<()> {
        let len: u32 = word.len().try_into().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("vocabulary word of {} bytes too long", word.len()),
            )
        })?;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(word.as_bytes())?;
        self.file.write_all(&[is_external as u8])?;
        self.file.write_all(&local_id.to_le_bytes())?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Patch the record count and close. Returns the count.
    pub fn finish(mut self) -> io::Result<u64> {
        self.file.flush()?;
        let mut file = self.file.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.count.to_le_bytes())?;
        file.flush()?;
        tracing::trace!(path = %self.path.display(), count = self.count, "partial vocabulary written");
        Ok(self.count)
    }
}

// ============================================================================
// Reader
// ============================================================================

pub struct PartialVocabReader {
    reader: BufReader<std::fs::File>,
    count: u64,
    remaining: u64,
}

impl PartialVocabReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut reader = BufReader::with_capacity(IO_BUFFER_BYTES, std::fs::File::open(path)?);
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        let count = u64::from_le_bytes(buf);
        Ok(Self {
            reader,
            count,
            remaining: count,
        })
    }

    /// Number of records in the file.
    pub fn num_records(&self) -> u64 {
        self.count
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn next_entry(&mut self) -> io::Result<Option<PartialVocabEntry>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf)?;
        let mut word = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        self.reader.read_exact(&mut word)?;
        let word = String::from_utf8(word).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("partial vocabulary word is not UTF-8: {e}"),
            )
        })?;
        let mut flag = [0u8; 1];
        self.reader.read_exact(&mut flag)?;
        if flag[0] > 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("partial vocabulary: invalid external flag {}", flag[0]),
            ));
        }
        let mut id_buf = [0u8; 8];
        self.reader.read_exact(&mut id_buf)?;
        self.remaining -= 1;
        Ok(Some(PartialVocabEntry {
            word,
            is_external: flag[0] == 1,
            local_id: u64::from_le_bytes(id_buf),
        }))
    }
}

impl Iterator for PartialVocabReader {
    type Item = io::Result<PartialVocabEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

// ============================================================================
// Prefetching reader
// ============================================================================

/// Reads a partial-vocabulary file on a background thread, `chunk` records
/// at a time, one chunk ahead of the consumer.
pub struct PrefetchingVocabReader {
    rx: mpsc::Receiver<io::Result<Vec<PartialVocabEntry>>>,
    current: std::vec::IntoIter<PartialVocabEntry>,
    count: u64,
    done: bool,
}

impl PrefetchingVocabReader {
    pub fn open(path: &Path, chunk: usize) -> io::Result<Self> {
        let mut reader = PartialVocabReader::open(path)?;
        let count = reader.num_records();
        let chunk = chunk.max(1);
        let (tx, rx) = mpsc::sync_channel(1);
        std::thread::Builder::new()
            .name("vocab-prefetch".into())
            .spawn(move || loop {
                let mut block = Vec::with_capacity(chunk.min(reader.remaining() as usize));
                let mut failed = None;
                while block.len() < chunk {
                    match reader.next_entry() {
                        Ok(Some(e)) => block.push(e),
                        Ok(None) => break,
                        Err(e) => {
                            failed = Some(e);
                            break;
                        }
                    }
                }
                let (msg, last) = match failed {
                    Some(e) => (Err(e), true),
                    None => {
                        let last = block.is_empty();
                        (Ok(block), last)
                    }
                };
                if tx.send(msg).is_err() || last {
                    return;
                }
            })?;
        Ok(Self {
            rx,
            current: Vec::new().into_iter(),
            count,
            done: false,
        })
    }

    pub fn num_records(&self) -> u64 {
        self.count
    }
}

impl Iterator for PrefetchingVocabReader {
    type Item = io::Result<PartialVocabEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.current.next() {
                return Some(Ok(e));
            }
            if self.done {
                return None;
            }
            match self.rx.recv() {
                Ok(Ok(block)) if block.is_empty() => {
                    self.done = true;
                    return None;
                }
                Ok(Ok(block)) => self.current = block.into_iter(),
                Ok(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Err(_) => {
                    self.done = true;
                    return Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "vocabulary prefetch thread stopped early",
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("rdf_index_partial_vocab_tests")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(path: &Path, words: &[(&str, bool)]) {
        let mut w = PartialVocabWriter::create(path).unwrap();
        for (i, (word, ext)) in words.iter().enumerate() {
            w.write_entry(word, *ext, i as u64).unwrap();
        }
        assert_eq!(w.finish().unwrap(), words.len() as u64);
    }

    #[test]
    fn test_write_read() {
        let dir = temp_dir("write_read");
        let path = dir.join("partial-vocab.00000");
        write(&path, &[("\"a\"", false), ("<b>", true), ("_:c", false)]);

        let r = PartialVocabReader::open(&path).unwrap();
        assert_eq!(r.num_records(), 3);
        let entries: Vec<_> = r.collect::<io::Result<_>>().unwrap();
        assert_eq!(
            entries[1],
            PartialVocabEntry {
                word: "<b>".into(),
                is_external: true,
                local_id: 1
            }
        );
        assert_eq!(entries[2].word, "_:c");
    }

    #[test]
    fn test_count_prefix_is_u64() {
        let dir = temp_dir("count_prefix");
        let path = dir.join("p");
        write(&path, &[("x", false)]);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], &1u64.to_le_bytes());
        assert_eq!(bytes.len(), 8 + 4 + 1 + 1 + 8);
    }

    #[test]
    fn test_truncated_file_errors() {
        let dir = temp_dir("truncated");
        let path = dir.join("p");
        write(&path, &[("hello", false), ("world", false)]);
        let len = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();
        let res: io::Result<Vec<_>> = PartialVocabReader::open(&path).unwrap().collect();
        assert!(res.is_err());
    }

    #[test]
    fn test_prefetching_reader_matches_plain() {
        let dir = temp_dir("prefetch");
        let path = dir.join("p");
        let words: Vec<String> = (0..1000).map(|i| format!("<w{i:04}>")).collect();
        let pairs: Vec<(&str, bool)> = words.iter().map(|w| (w.as_str(), false)).collect();
        write(&path, &pairs);

        let plain: Vec<_> = PartialVocabReader::open(&path)
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        let pre = PrefetchingVocabReader::open(&path, 7).unwrap();
        assert_eq!(pre.num_records(), 1000);
        let fetched: Vec<_> = pre.collect::<io::Result<_>>().unwrap();
        assert_eq!(plain, fetched);
    }
}
