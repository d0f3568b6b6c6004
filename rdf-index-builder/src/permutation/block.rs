//! Compressed permutation blocks.
//!
//! A block is a run of rows in permutation order, `[k0, k1, k2, g, payload]`,
//! stored column-major (all `k0` values, then all `k1` values, ...) as
//! little-endian u64s and compressed with zstd as a whole.

use std::io;

use rdf_index_core::Id;
use serde::{Deserialize, Serialize};

use crate::triples::id_triple::{GRAPH_COLUMN, NUM_COLUMNS};

/// One row in permutation column order.
pub type Row = [Id; NUM_COLUMNS];

/// Uncompressed size of one row.
pub const ROW_BYTES: usize = NUM_COLUMNS * 8;

/// More distinct graphs than this and a block stores "unknown" instead.
pub const MAX_GRAPHS_PER_BLOCK: usize = 20;

/// Statistics and location of one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub offset: u64,
    pub compressed_len: u64,
    pub num_rows: u64,
    pub first_row: Row,
    pub last_row: Row,
    /// Sorted distinct graphs, `None` if there are more than
    /// [`MAX_GRAPHS_PER_BLOCK`].
    pub graphs: Option<Vec<Id>>,
    /// Some adjacent rows share all three key columns.
    pub has_duplicates: bool,
}

impl BlockMetadata {
    /// Metadata for `rows` once written at `offset`.
    pub fn describe(rows: &[Row], offset: u64, compressed_len: u64) -> Option<Self> {
        let first_row = *rows.first()?;
        let last_row = *rows.last()?;
        Some(Self {
            offset,
            compressed_len,
            num_rows: rows.len() as u64,
            first_row,
            last_row,
            graphs: block_graphs(rows),
            has_duplicates: has_duplicate_keys(rows),
        })
    }

    pub fn uncompressed_len(&self) -> usize {
        self.num_rows as usize * ROW_BYTES
    }

    /// True if the block may contain rows of graph `g`.
    pub fn may_contain_graph(&self, g: Id) -> bool {
        match &self.graphs {
            Some(graphs) => graphs.binary_search(&g).is_ok(),
            None => true,
        }
    }
}

/// Distinct graphs of `rows`, capped at [`MAX_GRAPHS_PER_BLOCK`].
pub fn block_graphs(rows: &[Row]) -> Option<Vec<Id>> {
    let mut graphs: Vec<Id> = Vec::new();
    for row in rows {
        let g = row[GRAPH_COLUMN];
        if let Err(pos) = graphs.binary_search(&g) {
            if graphs.len() == MAX_GRAPHS_PER_BLOCK {
                return None;
            }
            graphs.insert(pos, g);
        }
    }
    Some(graphs)
}

/// Adjacent rows with equal key columns. Exact duplicates never reach a
/// block, so such rows differ in graph or payload.
pub fn has_duplicate_keys(rows: &[Row]) -> bool {
    rows.windows(2).any(|w| w[0][..3] == w[1][..3])
}

/// Column-major encode and compress.
pub fn encode_block(rows: &[Row], zstd_level: i32) -> io::Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(rows.len() * ROW_BYTES);
    for col in 0..NUM_COLUMNS {
        for row in rows {
            raw.extend_from_slice(&row[col].to_bits().to_le_bytes());
        }
    }
    zstd::bulk::compress(&raw, zstd_level)
}

/// Inverse of [`encode_block`].
pub fn decode_block(data: &[u8], num_rows: usize) -> io::Result<Vec<Row>> {
    let expected = num_rows * ROW_BYTES;
    let raw = zstd::bulk::decompress(data, expected).map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidData, format!("block: zstd decompress: {e}"))
    })?;
    if raw.len() != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("block: expected {expected} bytes, got {}", raw.len()),
        ));
    }
    let mut rows = vec![[Id::UNDEFINED; NUM_COLUMNS]; num_rows];
    for (col, column) in raw.chunks_exact(num_rows.max(1) * 8).enumerate().take(NUM_COLUMNS) {
        for (row, bytes) in rows.iter_mut().zip(column.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(bytes);
            row[col] = Id::from_bits(u64::from_le_bytes(word));
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(k: [u64; 3], g: u64) -> Row {
        [
            Id::vocab(k[0]),
            Id::vocab(k[1]),
            Id::vocab(k[2]),
            Id::vocab(g),
            Id::UNDEFINED,
        ]
    }

    #[test]
    fn test_encode_decode_block() {
        let rows: Vec<Row> = (0..100).map(|i| row([i / 10, i % 10, i], 1)).collect();
        let data = encode_block(&rows, 1).unwrap();
        assert!(data.len() < rows.len() * ROW_BYTES);
        assert_eq!(decode_block(&data, rows.len()).unwrap(), rows);
    }

    #[test]
    fn test_decode_rejects_wrong_row_count() {
        let rows = vec![row([1, 2, 3], 0); 4];
        let data = encode_block(&rows, 1).unwrap();
        assert!(decode_block(&data, 5).is_err());
    }

    #[test]
    fn test_graphs_capped() {
        let few: Vec<Row> = (0..5).map(|g| row([0, 0, g], g % 3)).collect();
        assert_eq!(
            block_graphs(&few),
            Some(vec![Id::vocab(0), Id::vocab(1), Id::vocab(2)])
        );
        let many: Vec<Row> = (0..(MAX_GRAPHS_PER_BLOCK as u64 + 1))
            .map(|g| row([0, 0, g], g))
            .collect();
        assert_eq!(block_graphs(&many), None);
        let exactly: Vec<Row> = (0..MAX_GRAPHS_PER_BLOCK as u64).map(|g| row([0, 0, g], g)).collect();
        assert_eq!(block_graphs(&exactly).map(|g| g.len()), Some(MAX_GRAPHS_PER_BLOCK));
    }

    #[test]
    fn test_duplicate_keys_flag() {
        let distinct = vec![row([1, 1, 1], 0), row([1, 1, 2], 0)];
        assert!(!has_duplicate_keys(&distinct));
        let dup = vec![row([1, 1, 1], 0), row([1, 1, 1], 5)];
        assert!(has_duplicate_keys(&dup));
    }

    #[test]
    fn test_describe() {
        let rows = vec![row([1, 2, 3], 7), row([4, 5, 6], 8)];
        let meta = BlockMetadata::describe(&rows, 16, 99).unwrap();
        assert_eq!(meta.first_row, rows[0]);
        assert_eq!(meta.last_row, rows[1]);
        assert_eq!(meta.num_rows, 2);
        assert!(meta.may_contain_graph(Id::vocab(8)));
        assert!(!meta.may_contain_graph(Id::vocab(9)));
        assert!(BlockMetadata::describe(&[], 0, 0).is_none());
    }
}
