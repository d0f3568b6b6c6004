//! Spool files: flat, append-only sequences of [`IdTriple`] records.
//!
//! Used for the batch-ordered triple sequence written by the partial
//! vocabulary writers and for the sorted runs of the external sorter.
//!
//! ## Layout
//!
//! A fixed 32-byte header followed by either raw [`RECORD_WIRE_SIZE`]-byte
//! records or one zstd stream of those record bytes:
//!
//! ```text
//! [magic "RSP1"][version u8][flags u8][reserved 2][record_count u64][reserved 16]
//! ```
//!
//! `record_count` is a placeholder until [`SpoolWriter::finish`] seeks back
//! and rewrites the header.

use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::id_triple::{IdTriple, RECORD_WIRE_SIZE};
use super::ordered_sink::BatchSink;

pub const SPOOL_MAGIC: [u8; 4] = *b"RSP1";
pub const SPOOL_VERSION: u8 = 1;
pub const SPOOL_HEADER_LEN: usize = 32;

const SPOOL_FLAG_ZSTD: u8 = 1 << 0;

const IO_BUFFER_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy)]
struct SpoolHeader {
    flags: u8,
    record_count: u64,
}

impl SpoolHeader {
    fn write_to(&self, buf: &mut [u8; SPOOL_HEADER_LEN]) {
        buf[0..4].copy_from_slice(&SPOOL_MAGIC);
        buf[4] = SPOOL_VERSION;
        buf[5] = self.flags;
        buf[6..8].fill(0);
        buf[8..16].copy_from_slice(&self.record_count.to_le_bytes());
        buf[16..32].fill(0);
    }

    fn read_from(buf: &[u8; SPOOL_HEADER_LEN]) -> io::Result<Self> {
        if buf[0..4] != SPOOL_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "spool: invalid magic bytes",
            ));
        }
        if buf[4] != SPOOL_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("spool: unsupported version {}", buf[4]),
            ));
        }
        let mut count = [0u8; 8];
        count.copy_from_slice(&buf[8..16]);
        Ok(Self {
            flags: buf[5],
            record_count: u64::from_le_bytes(count),
        })
    }
}

/// Compression options for spool writers.
#[derive(Debug, Clone, Copy)]
pub struct SpoolOptions {
    pub compress_zstd: bool,
    pub zstd_level: i32,
}

impl Default for SpoolOptions {
    fn default() -> Self {
        Self {
            compress_zstd: true,
            zstd_level: 1,
        }
    }
}

// ============================================================================
// SpoolWriter
// ============================================================================

/// Buffered binary writer appending [`IdTriple`]s to a spool file.
pub struct SpoolWriter {
    inner: SpoolWriterInner,
    path: PathBuf,
    record_count: u64,
    flags: u8,
}

enum SpoolWriterInner {
    Raw(BufWriter<std::fs::File>),
    Zstd(zstd::stream::write::Encoder<'static, std::fs::File>),
}

impl SpoolWriter {
    /// Create (or truncate) the spool file at `path`.
    pub fn create(path: impl Into<PathBuf>, options: SpoolOptions) -> io::Result<Self> {
        let path = path.into();
        let mut file = std::fs::File::create(&path)?;

        let flags = if options.compress_zstd { SPOOL_FLAG_ZSTD } else { 0 };
        let mut header_buf = [0u8; SPOOL_HEADER_LEN];
        SpoolHeader {
            flags,
            record_count: 0,
        }
        .write_to(&mut header_buf);
        file.write_all(&header_buf)?;

        let inner = if options.compress_zstd {
            let mut enc = zstd::stream::write::Encoder::new(file, options.zstd_level)?;
            enc.include_checksum(true)?;
            SpoolWriterInner::Zstd(enc)
        } else {
            SpoolWriterInner::Raw(BufWriter::with_capacity(IO_BUFFER_BYTES, file))
        };

        Ok(Self {
            inner,
            path,
            record_count: 0,
            flags,
        })
    }

    #[inline]
    pub fn push(&mut self, record: &IdTriple) -> io::Result<()> {
        let mut buf = [0u8; RECORD_WIRE_SIZE];
        record.write_le(&mut buf);
        match &mut self.inner {
            SpoolWriterInner::Raw(w) => w.write_all(&buf)?,
            SpoolWriterInner::Zstd(w) => w.write_all(&buf)?,
        }
        self.record_count += 1;
        Ok(())
    }

    pub fn push_all(&mut self, records: &[IdTriple]) -> io::Result<()> {
        records.iter().try_for_each(|r| self.push(r))
    }

    #[inline]
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush, rewrite the header with the final count, and close.
    pub fn finish(self) -> io::Result<SpoolFileInfo> {
        let mut file = match self.inner {
            SpoolWriterInner::Raw(mut w) => {
                w.flush()?;
                w.into_inner().map_err(|e| e.into_error())?
            }
            SpoolWriterInner::Zstd(w) => w.finish()?,
        };

        file.seek(SeekFrom::Start(0))?;
        let mut header_buf = [0u8; SPOOL_HEADER_LEN];
        SpoolHeader {
            flags: self.flags,
            record_count: self.record_count,
        }
        .write_to(&mut header_buf);
        file.write_all(&header_buf)?;
        file.flush()?;

        let byte_len = file.metadata()?.len();
        Ok(SpoolFileInfo {
            path: self.path,
            record_count: self.record_count,
            byte_len,
        })
    }
}

/// Metadata about a completed spool file.
#[derive(Debug, Clone)]
pub struct SpoolFileInfo {
    pub path: PathBuf,
    pub record_count: u64,
    /// File size on disk.
    pub byte_len: u64,
}

// ============================================================================
// BatchSpool
// ============================================================================

/// Spool that records where each batch starts, so the rewrite stage can
/// re-split the sequence at batch boundaries.
pub struct BatchSpool {
    writer: SpoolWriter,
    batch_sizes: Vec<u64>,
}

impl BatchSpool {
    pub fn create(path: impl Into<PathBuf>, options: SpoolOptions) -> io::Result<Self> {
        Ok(Self {
            writer: SpoolWriter::create(path, options)?,
            batch_sizes: Vec::new(),
        })
    }

    pub fn finish(self) -> io::Result<(SpoolFileInfo, Vec<u64>)> {
        Ok((self.writer.finish()?, self.batch_sizes))
    }
}

impl BatchSink<IdTriple> for BatchSpool {
    fn append_batch(&mut self, batch: usize, items: Vec<IdTriple>) -> io::Result<()> {
        if batch != self.batch_sizes.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "batch spool: got batch {batch}, expected {}",
                    self.batch_sizes.len()
                ),
            ));
        }
        self.writer.push_all(&items)?;
        self.batch_sizes.push(items.len() as u64);
        Ok(())
    }
}

// ============================================================================
// SpoolReader
// ============================================================================

/// Sequential reader for spool files.
pub struct SpoolReader {
    inner: SpoolReaderInner,
    remaining: u64,
}

enum SpoolReaderInner {
    Raw(io::BufReader<std::fs::File>),
    Zstd(io::BufReader<zstd::stream::read::Decoder<'static, io::BufReader<std::fs::File>>>),
}

impl std::fmt::Debug for SpoolReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpoolReader")
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl SpoolReader {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let mut file = std::fs::File::open(path)?;
        let mut header_buf = [0u8; SPOOL_HEADER_LEN];
        file.read_exact(&mut header_buf)?;
        let header = SpoolHeader::read_from(&header_buf)?;

        let inner = if header.flags & SPOOL_FLAG_ZSTD != 0 {
            let dec = zstd::stream::read::Decoder::new(file)?;
            SpoolReaderInner::Zstd(io::BufReader::with_capacity(IO_BUFFER_BYTES, dec))
        } else {
            let expected = SPOOL_HEADER_LEN as u64 + header.record_count * RECORD_WIRE_SIZE as u64;
            let actual = file.metadata()?.len();
            if actual < expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "spool file {} truncated: expected {expected} bytes, got {actual}",
                        path.display()
                    ),
                ));
            }
            SpoolReaderInner::Raw(io::BufReader::with_capacity(IO_BUFFER_BYTES, file))
        };

        Ok(Self {
            inner,
            remaining: header.record_count,
        })
    }

    /// Read the next record, or `None` once all records are consumed.
    pub fn next_record(&mut self) -> io::Result<Option<IdTriple>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let mut buf = [0u8; RECORD_WIRE_SIZE];
        match &mut self.inner {
            SpoolReaderInner::Raw(r) => r.read_exact(&mut buf)?,
            SpoolReaderInner::Zstd(r) => r.read_exact(&mut buf)?,
        }
        self.remaining -= 1;
        Ok(Some(IdTriple::read_le(&buf)))
    }

    /// Read up to `max` records.
    pub fn read_chunk(&mut self, max: usize) -> io::Result<Vec<IdTriple>> {
        let n = (self.remaining.min(max as u64)) as usize;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match self.next_record()? {
                Some(r) => out.push(r),
                None => break,
            }
        }
        Ok(out)
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for SpoolReader {
    type Item = io::Result<IdTriple>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
