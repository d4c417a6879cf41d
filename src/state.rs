//! Application state management

use std::sync::Arc;

use crate::config::{ChunkBackend, Config};
use crate::upload::{
    ChunkStore, CleanupPolicy, IntegrityVerifier, ProgressTracker, UploadCoordinator,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    coordinator: UploadCoordinator,
}

impl AppState {
    /// Wire the upload core from configuration
    pub fn new(config: Config) -> Self {
        let store = match config.upload.chunk_backend {
            ChunkBackend::Local => ChunkStore::with_local_storage(config.upload.root.clone()),
            ChunkBackend::Memory => ChunkStore::with_memory_storage(),
        };

        let coordinator = UploadCoordinator::new(
            store,
            ProgressTracker::new(),
            IntegrityVerifier::new(config.upload.digest),
            config.upload.root.clone(),
            CleanupPolicy {
                grace_period: config.upload.cleanup_grace,
            },
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                coordinator,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload coordinator
    pub fn coordinator(&self) -> &UploadCoordinator {
        &self.inner.coordinator
    }
}
