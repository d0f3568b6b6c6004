//! On-disk permutations: compressed blocks, files, and the twin pair builder.

pub mod block;
pub mod file;
pub mod pair;

pub use block::{BlockMetadata, Row, MAX_GRAPHS_PER_BLOCK, ROW_BYTES};
pub use file::{
    permutation_file_name, PermutationFileInfo, PermutationFileWriter, PermutationMetadata,
    PermutationReader, RelationMetadata,
};
pub use pair::{build_permutation_pair, PairCallbacks, PairInfo, PairOptions};
