//! Dataset persistence primitives: atomic file writes, the accumulated
//! dataset encoding, and the append-only merge.

pub mod atomic_writer;
pub mod dataset;
pub mod merge;

pub use atomic_writer::{write_atomic, AtomicFileWriter};
pub use dataset::{content_digest, AccumulatedDataset};
pub use merge::{MergeEngine, MergeReport, ReimportPolicy};
