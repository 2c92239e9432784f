//! Fragment memory for Mnemo: storage, compression, consolidation and
//! snapshot persistence.

pub mod compressor;
pub mod consolidator;
pub mod snapshot;
pub mod store;
pub mod vector;

pub use compressor::{CompressionResult, compress, compress_fragments};
pub use consolidator::{
    ConsolidationMode, ConsolidationOutcome, ConsolidationPhase, Consolidator, RunStatus,
};
pub use snapshot::{Snapshot, SnapshotFile};
pub use store::{CompactionReport, FragmentStore, IngestReport, Merge, StoreStats, StoreView};
pub use vector::{centroid, cosine_similarity, vector_search};
