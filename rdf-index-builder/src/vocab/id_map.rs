//! Batch-local → global id map files.
//!
//! One file per batch (`idmap.NNNNN`), a flat array of 16-byte records
//! `(batch_local_id u64 LE, global Id bits u64 LE)`. The merge pre-sizes the
//! file from the batch's partial-vocabulary record count (every batch-local
//! id is emitted exactly once) and appends through a writable mmap; the
//! rewrite stage maps it read-only, loads it into a hash map, and deletes it.

use std::io;
use std::path::{Path, PathBuf};

use rdf_index_core::Id;
use rustc_hash::FxHashMap;

pub const ID_MAP_RECORD_SIZE: usize = 16;

/// File name of the map for `batch` inside the temp directory.
pub fn id_map_file_name(batch: usize) -> String {
    format!("idmap.{batch:05}")
}

// ============================================================================
// Writer
// ============================================================================

/// Append-only writer over a pre-sized, memory-mapped map file.
pub struct IdMapWriter {
    mmap: Option<memmap2::MmapMut>,
    path: PathBuf,
    capacity: u64,
    len: u64,
}

impl IdMapWriter {
    /// Create a map file with room for `capacity` records.
    pub fn create(path: impl Into<PathBuf>, capacity: u64) -> io::Result<Self> {
        let path = path.into();
        let byte_len = capacity
            .checked_mul(ID_MAP_RECORD_SIZE as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "id map size overflow"))?;

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mmap = if byte_len == 0 {
            None
        } else {
            file.set_len(byte_len)?;
            Some(unsafe { memmap2::MmapMut::map_mut(&file)? })
        };

        Ok(Self {
            mmap,
            path,
            capacity,
            len: 0,
        })
    }

    #[inline]
    pub fn append(&mut self, local_id: u64, global: Id) -> io::Result<()> {
        let mmap = match &mut self.mmap {
            Some(m) if self.len < self.capacity => m,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "id map {} full: capacity={}, local_id={}",
                        self.path.display(),
                        self.capacity,
                        local_id
                    ),
                ))
            }
        };
        let off = self.len as usize * ID_MAP_RECORD_SIZE;
        mmap[off..off + 8].copy_from_slice(&local_id.to_le_bytes());
        mmap[off + 8..off + 16].copy_from_slice(&global.to_bits().to_le_bytes());
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush, unmap and trim the file to the records written.
    pub fn finish(self) -> io::Result<u64> {
        if let Some(mmap) = self.mmap {
            mmap.flush()?;
        }
        if self.len < self.capacity {
            let file = std::fs::OpenOptions::new().write(true).open(&self.path)?;
            file.set_len(self.len * ID_MAP_RECORD_SIZE as u64)?;
        }
        Ok(self.len)
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Read-only view of a finished map file.
pub struct IdMapReader {
    mmap: Option<memmap2::Mmap>,
}

impl IdMapReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let len = file.metadata()?.len();
        if len % ID_MAP_RECORD_SIZE as u64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "id map {} length {} not a multiple of {}",
                    path.display(),
                    len,
                    ID_MAP_RECORD_SIZE
                ),
            ));
        }
        let mmap = if len == 0 {
            None
        } else {
            Some(unsafe { memmap2::Mmap::map(&file)? })
        };
        Ok(Self { mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.as_ref().map_or(0, |m| m.len() / ID_MAP_RECORD_SIZE)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, Id)> + '_ {
        let bytes: &[u8] = self.mmap.as_deref().unwrap_or(&[]);
        bytes.chunks_exact(ID_MAP_RECORD_SIZE).map(|rec| {
            let mut local = [0u8; 8];
            let mut global = [0u8; 8];
            local.copy_from_slice(&rec[..8]);
            global.copy_from_slice(&rec[8..]);
            (u64::from_le_bytes(local), Id::from_bits(u64::from_le_bytes(global)))
        })
    }

    /// Load the whole map. Fails on a repeated batch-local id.
    pub fn load_hash_map(&self) -> io::Result<FxHashMap<u64, Id>> {
        let mut map = FxHashMap::with_capacity_and_hasher(self.len(), Default::default());
        for (local, global) in self.iter() {
            if map.insert(local, global).is_some() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("id map: batch-local id {local} mapped twice"),
                ));
            }
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("rdf_index_id_map_tests")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_append_and_load() {
        let dir = temp_dir("append_load");
        let path = dir.join(id_map_file_name(3));
        assert!(path.ends_with("idmap.00003"));

        let mut w = IdMapWriter::create(&path, 3).unwrap();
        w.append(2, Id::vocab(10)).unwrap();
        w.append(0, Id::blank_node(0)).unwrap();
        w.append(1, Id::vocab(11)).unwrap();
        assert!(w.append(3, Id::vocab(12)).is_err());
        assert_eq!(w.finish().unwrap(), 3);

        let r = IdMapReader::open(&path).unwrap();
        assert_eq!(r.len(), 3);
        let order: Vec<u64> = r.iter().map(|(l, _)| l).collect();
        assert_eq!(order, vec![2, 0, 1]);
        let map = r.load_hash_map().unwrap();
        assert_eq!(map[&0], Id::blank_node(0));
        assert_eq!(map[&2], Id::vocab(10));
    }

    #[test]
    fn test_short_map_trimmed() {
        let dir = temp_dir("trimmed");
        let path = dir.join("m");
        let mut w = IdMapWriter::create(&path, 10).unwrap();
        w.append(0, Id::vocab(0)).unwrap();
        w.finish().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);
    }

    #[test]
    fn test_empty_map() {
        let dir = temp_dir("empty");
        let path = dir.join("m");
        let w = IdMapWriter::create(&path, 0).unwrap();
        assert!(w.is_empty());
        w.finish().unwrap();
        let r = IdMapReader::open(&path).unwrap();
        assert!(r.is_empty());
        assert!(r.load_hash_map().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_local_rejected() {
        let dir = temp_dir("dup");
        let path = dir.join("m");
        let mut w = IdMapWriter::create(&path, 2).unwrap();
        w.append(0, Id::vocab(0)).unwrap();
        w.append(0, Id::vocab(1)).unwrap();
        w.finish().unwrap();
        assert!(IdMapReader::open(&path).unwrap().load_hash_map().is_err());
    }
}
