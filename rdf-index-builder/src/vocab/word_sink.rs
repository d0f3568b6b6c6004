//! File-backed [`WordCallback`]: the vocabulary as a forward file plus index.
//!
//! ## Output files
//!
//! - `vocabulary.fwd`: word bytes, concatenated in Global ID order
//! - `vocabulary.idx`: `"VIX1" + count(u64) + offsets(u64[count + 1])`
//! - `vocabulary.ext`: Global IDs of externalized words, `u64` LE each
//!
//! Word `i` is `fwd[offsets[i]..offsets[i + 1]]`.

use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::merge::WordCallback;

const INDEX_MAGIC: [u8; 4] = *b"VIX1";

pub struct WordFileSink {
    dir: PathBuf,
    fwd: BufWriter<std::fs::File>,
    offsets: BufWriter<std::fs::File>,
    ext: BufWriter<std::fs::File>,
    offsets_tmp: PathBuf,
    offset: u64,
    count: u64,
    external_count: u64,
}

impl WordFileSink {
    pub fn create(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let offsets_tmp = dir.join("vocabulary.offsets.tmp");
        Ok(Self {
            fwd: BufWriter::new(std::fs::File::create(dir.join("vocabulary.fwd"))?),
            offsets: BufWriter::new(std::fs::File::create(&offsets_tmp)?),
            ext: BufWriter::new(std::fs::File::create(dir.join("vocabulary.ext"))?),
            dir: dir.to_path_buf(),
            offsets_tmp,
            offset: 0,
            count: 0,
            external_count: 0,
        })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn external_count(&self) -> u64 {
        self.external_count
    }

    /// Write the index and close all files.
    pub fn finish(mut self) -> io::Result<u64> {
        self.offsets.write_all(&self.offset.to_le_bytes())?;
        self.offsets.flush()?;
        self.fwd.flush()?;
        self.ext.flush()?;

        let mut out = BufWriter::new(std::fs::File::create(self.dir.join("vocabulary.idx"))?);
        out.write_all(&INDEX_MAGIC)?;
        out.write_all(&self.count.to_le_bytes())?;
        let mut offsets = io::BufReader::new(std::fs::File::open(&self.offsets_tmp)?);
        io::copy(&mut offsets, &mut out)?;
        out.flush()?;
        std::fs::remove_file(&self.offsets_tmp)?;
        Ok(self.count)
    }
}

impl WordCallback for WordFileSink {
    fn push_word(&mut self, word: &str, is_external: bool) -> io::Result<u64> {
        let index = self.count;
        self.offsets.write_all(&self.offset.to_le_bytes())?;
        self.fwd.write_all(word.as_bytes())?;
        if is_external {
            self.ext.write_all(&index.to_le_bytes())?;
            self.external_count += 1;
        }
        self.offset += word.len() as u64;
        self.count += 1;
        Ok(index)
    }
}

/// Read a vocabulary written by [`WordFileSink`] back into memory.
pub fn read_vocabulary(dir: &Path) -> io::Result<Vec<String>> {
    let fwd = std::fs::read(dir.join("vocabulary.fwd"))?;
    let mut idx = Vec::new();
    std::fs::File::open(dir.join("vocabulary.idx"))?.read_to_end(&mut idx)?;
    if idx.len() < 12 || idx[..4] != INDEX_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "vocabulary index: bad header",
        ));
    }
    let mut count = [0u8; 8];
    count.copy_from_slice(&idx[4..12]);
    let count = u64::from_le_bytes(count) as usize;
    let offsets: Vec<usize> = idx[12..]
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            u64::from_le_bytes(b) as usize
        })
        .collect();
    if offsets.len() != count + 1 || offsets.last().copied() != Some(fwd.len()) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "vocabulary index: offsets do not match forward file",
        ));
    }
    offsets
        .windows(2)
        .map(|w| {
            String::from_utf8(fwd[w[0]..w[1]].to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        })
        .collect()
}
