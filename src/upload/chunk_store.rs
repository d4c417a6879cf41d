//! Chunk Store
//!
//! Durable storage for uploaded chunks, keyed by file identity and chunk index.
//! Supports a local filesystem backend and an in-process memory backend.
//!
//! A chunk becomes visible to `has_chunk` only once it has been fully written:
//! the local backend writes into a hidden temporary file and publishes it
//! under its final name with a create-if-absent link.

use std::collections::{btree_map, BTreeMap, HashMap};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use super::types::{FileIdentity, UploadError};

/// Readable chunk payload returned by a backend
pub type ChunkReader = Box<dyn AsyncRead + Send + Unpin>;

/// Result of a chunk write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkWrite {
    /// The chunk was persisted by this call
    Stored { bytes: u64 },

    /// Another writer published this index first; the payload was dropped
    Duplicate,
}

/// Reference to a committed chunk, produced in index order for merging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHandle {
    pub identity: FileIdentity,
    pub index: usize,
    pub len: u64,
}

// ============================================================================
// Chunk Store Trait
// ============================================================================

/// Trait for chunk storage backends
#[async_trait::async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Idempotently create the container for an identity's chunks
    async fn ensure_container(&self, identity: &FileIdentity) -> Result<(), UploadError>;

    /// Check whether a chunk has been committed
    async fn has_chunk(&self, identity: &FileIdentity, index: usize) -> Result<bool, UploadError>;

    /// Persist a chunk payload, copying the whole stream
    async fn write_chunk(
        &self,
        identity: &FileIdentity,
        index: usize,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ChunkWrite, UploadError>;

    /// Handles for chunks `0..total`, failing on the first absent index
    async fn list_chunks_in_order(
        &self,
        identity: &FileIdentity,
        total: usize,
    ) -> Result<Vec<ChunkHandle>, UploadError>;

    /// Open a committed chunk for reading
    async fn open_chunk(&self, handle: &ChunkHandle) -> Result<ChunkReader, UploadError>;

    /// Delete all chunks for an identity, returning how many were removed
    async fn discard_container(&self, identity: &FileIdentity) -> Result<usize, UploadError>;
}

// ============================================================================
// Chunk Store (Main Implementation)
// ============================================================================

/// Shared handle over a chunk storage backend
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn ChunkStorage>,
}

impl ChunkStore {
    /// Create with local filesystem storage rooted at `root`
    pub fn with_local_storage(root: PathBuf) -> Self {
        Self::with_backend(Arc::new(LocalChunkStorage::new(root)))
    }

    /// Create with in-process memory storage
    pub fn with_memory_storage() -> Self {
        Self::with_backend(Arc::new(MemoryChunkStorage::default()))
    }

    pub fn with_backend(backend: Arc<dyn ChunkStorage>) -> Self {
        Self { backend }
    }

    pub async fn ensure_container(&self, identity: &FileIdentity) -> Result<(), UploadError> {
        self.backend.ensure_container(identity).await
    }

    pub async fn has_chunk(&self, identity: &FileIdentity, index: usize) -> Result<bool, UploadError> {
        self.backend.has_chunk(identity, index).await
    }

    pub async fn write_chunk<R>(
        &self,
        identity: &FileIdentity,
        index: usize,
        mut data: R,
    ) -> Result<ChunkWrite, UploadError>
    where
        R: AsyncRead + Send + Unpin,
    {
        self.backend.write_chunk(identity, index, &mut data).await
    }

    pub async fn list_chunks_in_order(
        &self,
        identity: &FileIdentity,
        total: usize,
    ) -> Result<Vec<ChunkHandle>, UploadError> {
        self.backend.list_chunks_in_order(identity, total).await
    }

    pub async fn open_chunk(&self, handle: &ChunkHandle) -> Result<ChunkReader, UploadError> {
        self.backend.open_chunk(handle).await
    }

    pub async fn discard_container(&self, identity: &FileIdentity) -> Result<usize, UploadError> {
        self.backend.discard_container(identity).await
    }
}

// ============================================================================
// Local Filesystem Storage
// ============================================================================

/// Filesystem chunk storage: `<root>/<identity>/<index>`
pub struct LocalChunkStorage {
    root: PathBuf,
}

impl LocalChunkStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn container_path(&self, identity: &FileIdentity) -> PathBuf {
        self.root.join(identity.as_str())
    }

    fn chunk_path(&self, identity: &FileIdentity, index: usize) -> PathBuf {
        self.container_path(identity).join(index.to_string())
    }
}

async fn write_temp(path: &Path, data: &mut (dyn AsyncRead + Send + Unpin)) -> io::Result<u64> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let written = tokio::io::copy(data, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

#[async_trait::async_trait]
impl ChunkStorage for LocalChunkStorage {
    async fn ensure_container(&self, identity: &FileIdentity) -> Result<(), UploadError> {
        let container = self.container_path(identity);

        // Assembled files share the root with containers
        if let Ok(meta) = tokio::fs::metadata(&container).await {
            if !meta.is_dir() {
                return Err(UploadError::BadRequest(format!(
                    "file_md5 {} collides with an existing file",
                    identity
                )));
            }
        }

        tokio::fs::create_dir_all(&container)
            .await
            .map_err(UploadError::storage(format!(
                "Failed to create chunk directory for {}",
                identity
            )))
    }

    async fn has_chunk(&self, identity: &FileIdentity, index: usize) -> Result<bool, UploadError> {
        tokio::fs::try_exists(self.chunk_path(identity, index))
            .await
            .map_err(UploadError::storage(format!(
                "Failed to check chunk {} of {}",
                index, identity
            )))
    }

    async fn write_chunk(
        &self,
        identity: &FileIdentity,
        index: usize,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ChunkWrite, UploadError> {
        let final_path = self.chunk_path(identity, index);
        let temp_path = self
            .container_path(identity)
            .join(format!(".{}.{}.part", index, Uuid::new_v4()));

        let written = match write_temp(&temp_path, data).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(UploadError::storage(format!(
                    "Failed to write chunk {} of {}",
                    index, identity
                ))(e));
            }
        };

        let published = tokio::fs::hard_link(&temp_path, &final_path).await;
        let _ = tokio::fs::remove_file(&temp_path).await;

        match published {
            Ok(()) => Ok(ChunkWrite::Stored { bytes: written }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(ChunkWrite::Duplicate),
            Err(e) => Err(UploadError::storage(format!(
                "Failed to publish chunk {} of {}",
                index, identity
            ))(e)),
        }
    }

    async fn list_chunks_in_order(
        &self,
        identity: &FileIdentity,
        total: usize,
    ) -> Result<Vec<ChunkHandle>, UploadError> {
        let mut handles = Vec::with_capacity(total);

        for index in 0..total {
            match tokio::fs::metadata(self.chunk_path(identity, index)).await {
                Ok(meta) => handles.push(ChunkHandle {
                    identity: identity.clone(),
                    index,
                    len: meta.len(),
                }),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(UploadError::MissingChunk {
                        identity: identity.to_string(),
                        index,
                    });
                }
                Err(e) => {
                    return Err(UploadError::storage(format!(
                        "Failed to stat chunk {} of {}",
                        index, identity
                    ))(e));
                }
            }
        }

        Ok(handles)
    }

    async fn open_chunk(&self, handle: &ChunkHandle) -> Result<ChunkReader, UploadError> {
        match tokio::fs::File::open(self.chunk_path(&handle.identity, handle.index)).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(UploadError::MissingChunk {
                identity: handle.identity.to_string(),
                index: handle.index,
            }),
            Err(e) => Err(UploadError::storage(format!(
                "Failed to open chunk {} of {}",
                handle.index, handle.identity
            ))(e)),
        }
    }

    async fn discard_container(&self, identity: &FileIdentity) -> Result<usize, UploadError> {
        let container = self.container_path(identity);
        let tombstone = self
            .root
            .join(format!(".discard-{}-{}", identity, Uuid::new_v4()));

        // Frees the identity namespace before the slow recursive delete
        match tokio::fs::rename(&container, &tombstone).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(UploadError::storage(format!(
                    "Failed to detach chunk directory for {}",
                    identity
                ))(e));
            }
        }

        let mut count = 0;
        let mut entries = tokio::fs::read_dir(&tombstone)
            .await
            .map_err(UploadError::storage("Failed to list detached chunks"))?;
        while entries
            .next_entry()
            .await
            .map_err(UploadError::storage("Failed to list detached chunks"))?
            .is_some()
        {
            count += 1;
        }

        tokio::fs::remove_dir_all(&tombstone)
            .await
            .map_err(UploadError::storage(format!(
                "Failed to remove {}",
                tombstone.display()
            )))?;

        Ok(count)
    }
}

// ============================================================================
// Memory Storage
// ============================================================================

/// In-process chunk storage, lost on restart
#[derive(Default)]
pub struct MemoryChunkStorage {
    containers: Mutex<HashMap<FileIdentity, BTreeMap<usize, Bytes>>>,
}

#[async_trait::async_trait]
impl ChunkStorage for MemoryChunkStorage {
    async fn ensure_container(&self, identity: &FileIdentity) -> Result<(), UploadError> {
        self.containers.lock().entry(identity.clone()).or_default();
        Ok(())
    }

    async fn has_chunk(&self, identity: &FileIdentity, index: usize) -> Result<bool, UploadError> {
        Ok(self
            .containers
            .lock()
            .get(identity)
            .is_some_and(|chunks| chunks.contains_key(&index)))
    }

    async fn write_chunk(
        &self,
        identity: &FileIdentity,
        index: usize,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ChunkWrite, UploadError> {
        let mut buf = Vec::new();
        data.read_to_end(&mut buf)
            .await
            .map_err(UploadError::storage(format!(
                "Failed to read chunk {} of {}",
                index, identity
            )))?;
        let bytes = buf.len() as u64;

        let mut containers = self.containers.lock();
        match containers.entry(identity.clone()).or_default().entry(index) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(Bytes::from(buf));
                Ok(ChunkWrite::Stored { bytes })
            }
            btree_map::Entry::Occupied(_) => Ok(ChunkWrite::Duplicate),
        }
    }

    async fn list_chunks_in_order(
        &self,
        identity: &FileIdentity,
        total: usize,
    ) -> Result<Vec<ChunkHandle>, UploadError> {
        let containers = self.containers.lock();
        let chunks = containers.get(identity);

        (0..total)
            .map(|index| {
                chunks
                    .and_then(|chunks| chunks.get(&index))
                    .map(|data| ChunkHandle {
                        identity: identity.clone(),
                        index,
                        len: data.len() as u64,
                    })
                    .ok_or_else(|| UploadError::MissingChunk {
                        identity: identity.to_string(),
                        index,
                    })
            })
            .collect()
    }

    async fn open_chunk(&self, handle: &ChunkHandle) -> Result<ChunkReader, UploadError> {
        let data = self
            .containers
            .lock()
            .get(&handle.identity)
            .and_then(|chunks| chunks.get(&handle.index))
            .cloned()
            .ok_or_else(|| UploadError::MissingChunk {
                identity: handle.identity.to_string(),
                index: handle.index,
            })?;

        Ok(Box::new(Cursor::new(data)))
    }

    async fn discard_container(&self, identity: &FileIdentity) -> Result<usize, UploadError> {
        Ok(self
            .containers
            .lock()
            .remove(identity)
            .map_or(0, |chunks| chunks.len()))
    }
}

// ============================================================================
// Tests
// ============================================================================
