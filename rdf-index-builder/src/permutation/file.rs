//! Permutation files.
//!
//! Layout:
//!
//! ```text
//! [magic "RPM1"][version u8][permutation u8][pad 2]
//! [block 0][block 1]...            zstd, see `block`
//! [metadata]                       JSON `PermutationMetadata`
//! [metadata_offset u64][metadata_len u64][magic "RPMF"]
//! ```
//!
//! The file is written under a temporary name and renamed on finish.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rdf_index_core::{Id, Permutation};
use serde::{Deserialize, Serialize};

use super::block::{decode_block, encode_block, BlockMetadata, Row};
use crate::error::{IndexBuildError, Result};

const FILE_MAGIC: [u8; 4] = *b"RPM1";
const FOOTER_MAGIC: [u8; 4] = *b"RPMF";
const FILE_VERSION: u8 = 1;
const HEADER_LEN: u64 = 8;
const FOOTER_LEN: u64 = 20;

/// `index.pso`
pub fn permutation_file_name(perm: Permutation) -> String {
    format!("index.{}", perm.name())
}

/// Rows sharing one leading-column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationMetadata {
    pub key: Id,
    pub first_block: u32,
    pub last_block: u32,
    pub num_rows: u64,
    /// `num_rows / distinct values` of the second key column.
    pub multiplicity_col1: f64,
    /// `num_rows / distinct values` of the third key column.
    pub multiplicity_col2: f64,
}

impl RelationMetadata {
    /// The same relation seen from the twin permutation.
    pub fn for_twin(&self) -> Self {
        Self {
            multiplicity_col1: self.multiplicity_col2,
            multiplicity_col2: self.multiplicity_col1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermutationMetadata {
    pub permutation: Permutation,
    pub num_rows: u64,
    pub blocks: Vec<BlockMetadata>,
    /// Ascending by key.
    pub relations: Vec<RelationMetadata>,
}

impl PermutationMetadata {
    pub fn relation(&self, key: Id) -> Option<&RelationMetadata> {
        self.relations
            .binary_search_by(|r| r.key.cmp(&key))
            .ok()
            .map(|i| &self.relations[i])
    }
}

/// Summary of a finished permutation file.
#[derive(Debug, Clone, Serialize)]
pub struct PermutationFileInfo {
    pub permutation: Permutation,
    pub path: PathBuf,
    pub num_rows: u64,
    pub num_blocks: usize,
    pub num_relations: usize,
    pub file_bytes: u64,
}

/// Streams blocks into one permutation file.
pub struct PermutationFileWriter {
    permutation: Permutation,
    tmp_path: PathBuf,
    final_path: PathBuf,
    out: BufWriter<File>,
    offset: u64,
    zstd_level: i32,
    meta: PermutationMetadata,
}

impl PermutationFileWriter {
    pub fn create(dir: &Path, permutation: Permutation, zstd_level: i32) -> Result<Self> {
        let name = permutation_file_name(permutation);
        let final_path = dir.join(&name);
        let tmp_path = dir.join(format!(".{name}.tmp"));
        let mut out = BufWriter::new(File::create(&tmp_path)?);
        out.write_all(&FILE_MAGIC)?;
        out.write_all(&[FILE_VERSION, permutation.to_u8(), 0, 0])?;
        Ok(Self {
            permutation,
            tmp_path,
            final_path,
            out,
            offset: HEADER_LEN,
            zstd_level,
            meta: PermutationMetadata {
                permutation,
                num_rows: 0,
                blocks: Vec::new(),
                relations: Vec::new(),
            },
        })
    }

    /// Compress and append a block. Returns its index.
    pub fn write_block(&mut self, rows: &[Row]) -> Result<u32> {
        let data = encode_block(rows, self.zstd_level)?;
        self.write_encoded(rows, &data)
    }

    /// Append a block already compressed with [`encode_block`].
    pub fn write_encoded(&mut self, rows: &[Row], data: &[u8]) -> Result<u32> {
        let meta = BlockMetadata::describe(rows, self.offset, data.len() as u64)
            .ok_or_else(|| IndexBuildError::Corrupt("empty permutation block".into()))?;
        self.out.write_all(data)?;
        self.offset += data.len() as u64;
        self.meta.num_rows += meta.num_rows;
        self.meta.blocks.push(meta);
        Ok(self.meta.blocks.len() as u32 - 1)
    }

    pub fn add_relation(&mut self, relation: RelationMetadata) {
        self.meta.relations.push(relation);
    }

    pub fn num_blocks(&self) -> usize {
        self.meta.blocks.len()
    }

    pub fn zstd_level(&self) -> i32 {
        self.zstd_level
    }

    /// Write metadata and footer, then move the file to its final name.
    pub fn finish(mut self) -> Result<PermutationFileInfo> {
        let meta = serde_json::to_vec(&self.meta)?;
        self.out.write_all(&meta)?;
        self.out.write_all(&self.offset.to_le_bytes())?;
        self.out.write_all(&(meta.len() as u64).to_le_bytes())?;
        self.out.write_all(&FOOTER_MAGIC)?;
        let file = self
            .out
            .into_inner()
            .map_err(|e| IndexBuildError::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&self.tmp_path, &self.final_path).map_err(|source| {
            IndexBuildError::TempFile {
                path: self.tmp_path.clone(),
                source,
            }
        })?;
        let file_bytes = self.offset + meta.len() as u64 + FOOTER_LEN;
        tracing::debug!(
            permutation = self.permutation.name(),
            blocks = self.meta.blocks.len(),
            rows = self.meta.num_rows,
            file_bytes,
            "permutation file written"
        );
        Ok(PermutationFileInfo {
            permutation: self.permutation,
            path: self.final_path,
            num_rows: self.meta.num_rows,
            num_blocks: self.meta.blocks.len(),
            num_relations: self.meta.relations.len(),
            file_bytes,
        })
    }
}

/// Random access to a finished permutation file.
pub struct PermutationReader {
    file: File,
    meta: PermutationMetadata,
}

impl PermutationReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN + FOOTER_LEN {
            return Err(corrupt(path, "file too short"));
        }
        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if header[..4] != FILE_MAGIC || header[4] != FILE_VERSION {
            return Err(corrupt(path, "bad header"));
        }

        let mut footer = [0u8; FOOTER_LEN as usize];
        file.seek(SeekFrom::Start(len - FOOTER_LEN))?;
        file.read_exact(&mut footer)?;
        if footer[16..] != FOOTER_MAGIC {
            return Err(corrupt(path, "bad footer magic"));
        }
        let meta_offset = u64_at(&footer, 0);
        let meta_len = u64_at(&footer, 8);
        if meta_offset
            .checked_add(meta_len)
            .map_or(true, |end| end + FOOTER_LEN != len)
        {
            return Err(corrupt(path, "metadata range does not match file length"));
        }

        let mut raw = vec![0u8; meta_len as usize];
        file.seek(SeekFrom::Start(meta_offset))?;
        file.read_exact(&mut raw)?;
        let meta: PermutationMetadata = serde_json::from_slice(&raw)?;
        if Permutation::from_u8(header[5]) != Some(meta.permutation) {
            return Err(corrupt(path, "header and metadata disagree on permutation"));
        }
        Ok(Self { file, meta })
    }

    pub fn metadata(&self) -> &PermutationMetadata {
        &self.meta
    }

    pub fn num_blocks(&self) -> usize {
        self.meta.blocks.len()
    }

    pub fn read_block(&mut self, index: usize) -> Result<Vec<Row>> {
        let block = self.meta.blocks.get(index).ok_or_else(|| {
            IndexBuildError::Corrupt(format!(
                "block {index} out of range ({} blocks)",
                self.meta.blocks.len()
            ))
        })?;
        let mut data = vec![0u8; block.compressed_len as usize];
        self.file.seek(SeekFrom::Start(block.offset))?;
        self.file.read_exact(&mut data)?;
        Ok(decode_block(&data, block.num_rows as usize)?)
    }

    /// All rows whose leading column is `key`, in this permutation's order.
    pub fn read_relation(&mut self, key: Id) -> Result<Vec<Row>> {
        let Some(rel) = self.meta.relation(key).cloned() else {
            return Ok(Vec::new());
        };
        let mut rows = Vec::with_capacity(rel.num_rows as usize);
        for b in rel.first_block..=rel.last_block {
            rows.extend(self.read_block(b as usize)?.into_iter().filter(|r| r[0] == key));
        }
        Ok(rows)
    }
}

fn u64_at(buf: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(word)
}

fn corrupt(path: &Path, what: &str) -> IndexBuildError {
    IndexBuildError::Corrupt(format!("permutation file {}: {what}", path.display()))
}
