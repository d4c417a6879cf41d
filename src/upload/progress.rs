//! Upload Progress Tracker
//!
//! Per-identity count of committed chunks. Every operation takes the same
//! lock, so increments for one identity are linearizable and each caller
//! sees the exact count its own increment produced. Completion detection
//! relies on that: only one caller can ever receive the value equal to the
//! declared total.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::types::{FileIdentity, UploadError};

#[derive(Debug, Default)]
struct ProgressEntry {
    received: usize,
    /// Reservations handed out and not yet settled
    pending: usize,
    declared_total: Option<usize>,
}

/// Tracks how many chunks of each file have landed
#[derive(Clone, Default)]
pub struct ProgressTracker {
    entries: Arc<Mutex<HashMap<FileIdentity, ProgressEntry>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for a chunk of `identity` declaring `total` chunks.
    ///
    /// The first declaration fixes the total for as long as the entry lives;
    /// a request declaring a different total is rejected so the count can
    /// never run past it. The reservation either records the chunk or, when
    /// dropped unused, leaves no trace of an entry it created.
    pub fn declare_total(
        &self,
        identity: &FileIdentity,
        total: usize,
    ) -> Result<Reservation, UploadError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(identity.clone()).or_default();

        match entry.declared_total {
            Some(existing) if existing != total => {
                return Err(UploadError::BadRequest(format!(
                    "chunk_total {} conflicts with previously declared {} for {}",
                    total, existing, identity
                )));
            }
            _ => {
                entry.declared_total = Some(total);
                entry.pending += 1;
            }
        }

        Ok(Reservation {
            tracker: self.clone(),
            identity: identity.clone(),
            settled: false,
        })
    }

    /// Increment and return the count for an identity
    pub fn record_chunk_received(&self, identity: &FileIdentity) -> usize {
        let mut entries = self.entries.lock();
        let entry = entries.entry(identity.clone()).or_default();
        entry.received += 1;
        entry.received
    }

    fn settle(&self, identity: &FileIdentity, counted: bool) -> usize {
        let mut entries = self.entries.lock();
        let entry = entries.entry(identity.clone()).or_default();
        entry.pending = entry.pending.saturating_sub(1);
        if counted {
            entry.received += 1;
        }

        let received = entry.received;
        if received == 0 && entry.pending == 0 {
            entries.remove(identity);
        }
        received
    }

    /// Current count, zero for unknown identities
    pub fn current_count(&self, identity: &FileIdentity) -> usize {
        self.entries
            .lock()
            .get(identity)
            .map_or(0, |entry| entry.received)
    }

    /// Drop the entry; the next chunk for this identity starts over at 1
    pub fn forget(&self, identity: &FileIdentity) -> Option<usize> {
        self.entries
            .lock()
            .remove(identity)
            .map(|entry| entry.received)
    }

    /// Number of identities with at least one counted chunk
    pub fn active_uploads(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.received > 0)
            .count()
    }
}

/// A declared chunk that has not been counted yet
#[must_use = "dropping a reservation releases it without counting the chunk"]
pub struct Reservation {
    tracker: ProgressTracker,
    identity: FileIdentity,
    settled: bool,
}

impl Reservation {
    /// Count the chunk and return the new total for the identity
    pub fn record_chunk_received(mut self) -> usize {
        self.settled = true;
        self.tracker.settle(&self.identity, true)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.tracker.settle(&self.identity, false);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
