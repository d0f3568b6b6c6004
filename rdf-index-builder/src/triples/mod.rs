//! ID-triple records and the files and sinks that carry them between stages.

pub mod id_triple;
pub mod ordered_sink;
pub mod sorter;
pub mod spool;

pub use id_triple::{cmp_for_permutation, IdTriple, NUM_COLUMNS, RECORD_WIRE_SIZE};
pub use ordered_sink::{BatchSink, OrderedSink};
pub use sorter::{ExternalSorter, SortedTriples, SorterConfig};
pub use spool::{BatchSpool, SpoolFileInfo, SpoolOptions, SpoolReader, SpoolWriter};
