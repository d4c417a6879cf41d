//! Upload Coordinator
//!
//! Drives one chunk request end to end:
//!
//! 1. Chunk already present: answer with the current progress (client retry).
//! 2. New chunk: persist it, then increment progress.
//! 3. The request whose increment reaches the declared total merges the
//!    chunks, verifies the fingerprint, discards the chunk container and
//!    forgets the progress entry.
//!
//! Chunk requests for one identity share a gate that completion takes
//! exclusively, so a request arriving mid-completion is handled as if it
//! came after: against a discarded container and a fresh count.
//!
//! A failed merge or verification leaves progress, chunks and any merged
//! artifact in place for an operator to inspect.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio::sync::RwLock;

use super::chunk_store::{ChunkStore, ChunkWrite};
use super::integrity::IntegrityVerifier;
use super::merger::Merger;
use super::progress::ProgressTracker;
use super::types::{ChunkRequest, FileIdentity, UploadError, UploadOutcome};

/// What happens to a chunk container after a successful upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPolicy {
    /// Delay before discarding chunks, giving the platform time to release
    /// just-closed file handles
    pub grace_period: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(500),
        }
    }
}

/// Per-identity read/write gates, dropped once nobody holds them
#[derive(Clone, Default)]
struct IdentityGates {
    gates: Arc<Mutex<HashMap<FileIdentity, Weak<RwLock<()>>>>>,
}

impl IdentityGates {
    fn gate(&self, identity: &FileIdentity) -> Arc<RwLock<()>> {
        let mut gates = self.gates.lock();
        if let Some(gate) = gates.get(identity).and_then(Weak::upgrade) {
            return gate;
        }

        gates.retain(|_, gate| gate.strong_count() > 0);
        let gate = Arc::new(RwLock::new(()));
        gates.insert(identity.clone(), Arc::downgrade(&gate));
        gate
    }
}

#[derive(Clone)]
pub struct UploadCoordinator {
    store: ChunkStore,
    progress: ProgressTracker,
    merger: Merger,
    verifier: IntegrityVerifier,
    artifact_root: PathBuf,
    cleanup: CleanupPolicy,
    gates: IdentityGates,
}

impl UploadCoordinator {
    pub fn new(
        store: ChunkStore,
        progress: ProgressTracker,
        verifier: IntegrityVerifier,
        artifact_root: PathBuf,
        cleanup: CleanupPolicy,
    ) -> Self {
        Self {
            merger: Merger::new(store.clone()),
            store,
            progress,
            verifier,
            artifact_root,
            cleanup,
            gates: IdentityGates::default(),
        }
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn verifier(&self) -> &IntegrityVerifier {
        &self.verifier
    }

    /// Where the assembled file for `file_name` is written
    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.artifact_root.join(file_name)
    }

    /// Handle one chunk upload
    pub async fn handle_chunk<R>(
        &self,
        request: &ChunkRequest,
        data: R,
    ) -> Result<UploadOutcome, UploadError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let identity = &request.identity;
        self.check_destination(request).await?;

        let gate = self.gates.gate(identity);
        let shared = gate.clone().read_owned().await;

        let reservation = self.progress.declare_total(identity, request.chunk_total)?;
        self.store.ensure_container(identity).await?;

        if self.store.has_chunk(identity, request.chunk_index).await? {
            return Ok(self.already_present(request));
        }

        let bytes = match self
            .store
            .write_chunk(identity, request.chunk_index, data)
            .await?
        {
            ChunkWrite::Stored { bytes } => bytes,
            // Lost a race with a concurrent upload of the same index
            ChunkWrite::Duplicate => return Ok(self.already_present(request)),
        };

        let progress = reservation.record_chunk_received();

        tracing::debug!(
            identity = %identity,
            chunk_index = request.chunk_index,
            bytes = bytes,
            progress = progress,
            chunk_total = request.chunk_total,
            "Chunk stored"
        );

        // Declared totals are fixed while an entry lives
        debug_assert!(
            progress <= request.chunk_total,
            "progress {} past total {}",
            progress,
            request.chunk_total
        );
        if progress < request.chunk_total {
            return Ok(UploadOutcome::InProgress { progress });
        }
        if progress > request.chunk_total {
            tracing::error!(
                identity = %identity,
                progress = progress,
                chunk_total = request.chunk_total,
                "Progress ran past the declared total"
            );
            return Ok(UploadOutcome::InProgress {
                progress: request.chunk_total,
            });
        }

        drop(shared);
        let _exclusive = gate.write_owned().await;
        self.complete(request, progress).await
    }

    /// The artifact lands beside the chunk containers, so its name must not
    /// belong to one of them
    async fn check_destination(&self, request: &ChunkRequest) -> Result<(), UploadError> {
        match tokio::fs::metadata(self.artifact_path(&request.file_name)).await {
            Ok(meta) if meta.is_dir() => Err(UploadError::BadRequest(format!(
                "file_name {:?} collides with an upload in progress",
                request.file_name
            ))),
            _ => Ok(()),
        }
    }

    fn already_present(&self, request: &ChunkRequest) -> UploadOutcome {
        let progress = self.progress.current_count(&request.identity);

        tracing::debug!(
            identity = %request.identity,
            chunk_index = request.chunk_index,
            progress = progress,
            "Chunk already present, skipping"
        );

        UploadOutcome::InProgress { progress }
    }

    /// Merge, verify and clean up. Runs only for the request whose increment
    /// reached the declared total, with the identity's gate held exclusively.
    async fn complete(
        &self,
        request: &ChunkRequest,
        progress: usize,
    ) -> Result<UploadOutcome, UploadError> {
        let identity = &request.identity;
        let destination = self.artifact_path(&request.file_name);

        tracing::info!(
            identity = %identity,
            file_name = %request.file_name,
            chunks = request.chunk_total,
            "Assembling file from chunks"
        );

        let bytes = self
            .merger
            .merge(identity, &destination, request.chunk_total)
            .await?;

        self.verifier.verify(&destination, identity.as_str()).await?;

        tracing::info!(
            identity = %identity,
            file_name = %request.file_name,
            size = bytes,
            algorithm = %self.verifier.algorithm(),
            "File assembled and verified"
        );

        if !self.cleanup.grace_period.is_zero() {
            tokio::time::sleep(self.cleanup.grace_period).await;
        }

        self.discard_chunks(identity).await;
        self.progress.forget(identity);

        Ok(UploadOutcome::Completed { progress, bytes })
    }

    async fn discard_chunks(&self, identity: &FileIdentity) {
        match self.store.discard_container(identity).await {
            Ok(count) => {
                tracing::debug!(identity = %identity, chunks = count, "Discarded chunk container");
            }
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "Failed to discard chunk container");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
