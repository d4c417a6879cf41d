//! Chunk merger
//!
//! Concatenates an identity's chunks, in ascending index order, into the
//! destination artifact. Output goes to a temporary sibling first and is
//! renamed into place only after every chunk has been copied and synced.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

use super::chunk_store::{ChunkHandle, ChunkStore};
use super::types::{FileIdentity, UploadError};

#[derive(Clone)]
pub struct Merger {
    store: ChunkStore,
}

impl Merger {
    pub fn new(store: ChunkStore) -> Self {
        Self { store }
    }

    /// Merge chunks `0..total` into `destination`, returning bytes written.
    ///
    /// Overwrites an existing destination, so callers must run it at most
    /// once per completed upload.
    pub async fn merge(
        &self,
        identity: &FileIdentity,
        destination: &Path,
        total: usize,
    ) -> Result<u64, UploadError> {
        let handles = self.store.list_chunks_in_order(identity, total).await?;
        let partial = partial_path(destination);

        let written = match self.write_all(&handles, &partial).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, destination).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(UploadError::storage(format!(
                "Failed to move merged file to {}",
                destination.display()
            ))(e));
        }

        Ok(written)
    }

    async fn write_all(
        &self,
        handles: &[ChunkHandle],
        partial: &Path,
    ) -> Result<u64, UploadError> {
        let file = tokio::fs::File::create(partial)
            .await
            .map_err(UploadError::storage(format!(
                "Failed to create {}",
                partial.display()
            )))?;
        let mut out = BufWriter::new(file);
        let mut written = 0;

        for handle in handles {
            let mut chunk = self.store.open_chunk(handle).await?;
            written += tokio::io::copy(&mut chunk, &mut out)
                .await
                .map_err(UploadError::storage(format!(
                    "Failed to copy chunk {} of {}",
                    handle.index, handle.identity
                )))?;
        }

        out.flush()
            .await
            .map_err(UploadError::storage("Failed to flush merged file"))?;
        out.get_ref()
            .sync_all()
            .await
            .map_err(UploadError::storage("Failed to sync merged file"))?;

        Ok(written)
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.{}.merging", name, Uuid::new_v4()))
}

// ============================================================================
// Tests
// ============================================================================
