//! Catalog contract (§6) plus a minimal in-memory implementation for tests
//! and single-process embeddings.
//!
//! The catalog is the archive's registry: it hands out `recordingId`s,
//! mirrors each recording's descriptor as it progresses, and ensures a
//! recording never admits two live recorders at once. The dispatcher that
//! fronts it for remote clients is out of scope (§1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::descriptor::RecordingDescriptor;
use crate::error::{ArchiveError, ArchiveResult};
use crate::transport::StreamIdentity;

pub trait Catalog: Send {
    /// Registers a new recording and returns its id. Fails with
    /// [`ArchiveError::AlreadyRecording`] if `recording_id` already has a
    /// live recorder (only meaningful for catalogs that let callers pick an
    /// id; the in-memory catalog always mints a fresh one).
    fn add_new_recording(&mut self, identity: &StreamIdentity) -> ArchiveResult<u64>;

    /// Mirrors the latest descriptor snapshot for `recording_id`.
    fn update_catalog_from_meta(&mut self, recording_id: u64, descriptor: &RecordingDescriptor) -> ArchiveResult<()>;

    /// Releases the recording, allowing a future recorder to reuse the slot
    /// (the metadata and segment files on disk are untouched).
    fn remove_recording_session(&mut self, recording_id: u64);
}

/// A single-process, in-memory catalog. Good enough for tests and for
/// embedding the engine directly inside a process that doesn't need a
/// separate catalog service.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    next_id: AtomicU64,
    active: HashMap<u64, StreamIdentity>,
    descriptors: HashMap<u64, RecordingDescriptor>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: HashMap::new(),
            descriptors: HashMap::new(),
        }
    }

    pub fn descriptor(&self, recording_id: u64) -> Option<&RecordingDescriptor> {
        self.descriptors.get(&recording_id)
    }

    pub fn is_active(&self, recording_id: u64) -> bool {
        self.active.contains_key(&recording_id)
    }
}

impl Catalog for InMemoryCatalog {
    fn add_new_recording(&mut self, identity: &StreamIdentity) -> ArchiveResult<u64> {
        let recording_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.active.insert(recording_id, identity.clone());
        Ok(recording_id)
    }

    fn update_catalog_from_meta(&mut self, recording_id: u64, descriptor: &RecordingDescriptor) -> ArchiveResult<()> {
        if !self.descriptors.contains_key(&recording_id) && !self.active.contains_key(&recording_id) {
            return Err(ArchiveError::NotFound(recording_id));
        }
        self.descriptors.insert(recording_id, descriptor.clone());
        Ok(())
    }

    fn remove_recording_session(&mut self, recording_id: u64) {
        self.active.remove(&recording_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> StreamIdentity {
        StreamIdentity {
            source: "127.0.0.1:40001".to_string(),
            session_id: 1,
            channel: "test-channel".to_string(),
            stream_id: 10,
            mtu_length: 1408,
        }
    }

    #[test]
    fn mints_unique_ids_and_tracks_active_state() {
        let mut catalog = InMemoryCatalog::new();
        let a = catalog.add_new_recording(&identity()).unwrap();
        let b = catalog.add_new_recording(&identity()).unwrap();
        assert_ne!(a, b);
        assert!(catalog.is_active(a));
        catalog.remove_recording_session(a);
        assert!(!catalog.is_active(a));
    }
}
