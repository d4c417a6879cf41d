//! Chunked Upload Module
//!
//! Implements chunked file uploads with:
//! - Idempotent chunk storage keyed by file fingerprint and chunk index
//! - Lock-protected per-file progress counting
//! - Ordered reassembly and whole-file digest verification
//!
//! Protocol Flow:
//! 1. Client splits a file into numbered chunks and fingerprints the whole file
//! 2. Each chunk is posted independently, in any order, retried as needed
//! 3. The request that lands the last missing chunk triggers reassembly
//! 4. The assembled file is verified against the fingerprint and the chunks
//!    are discarded

pub mod chunk_store;
pub mod coordinator;
pub mod integrity;
pub mod merger;
pub mod progress;
pub mod types;

pub use chunk_store::{ChunkStorage, ChunkStore, LocalChunkStorage, MemoryChunkStorage};
pub use coordinator::{CleanupPolicy, UploadCoordinator};
pub use integrity::{DigestAlgorithm, IntegrityVerifier};
pub use merger::Merger;
pub use progress::{ProgressTracker, Reservation};
pub use types::*;
