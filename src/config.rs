//! Plain configuration structs for the recorder and replay session.
//!
//! No env/CLI parsing layer lives here; the dispatcher and launch plumbing
//! that would build these from a config file are out of scope (§1), but the
//! values themselves are real knobs a caller sets before construction.

use std::path::PathBuf;

/// Default replay linger: how long a replay session waits, after the cursor
/// is exhausted, before tearing down (gives the peer time to drain).
pub const DEFAULT_LINGER_LENGTH_MS: i64 = 1000;

/// Default number of fragments a replay session sends per tick.
pub const DEFAULT_REPLAY_SEND_BATCH_SIZE: usize = 8;

/// Durability and sizing knobs for one recording.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Directory holding metadata and segment files for all recordings.
    pub archive_dir: PathBuf,
    /// Term buffer length `L` (power of two).
    pub term_buffer_length: i32,
    /// Segment file length; must be a positive multiple of `term_buffer_length`
    /// with `segment_file_length / term_buffer_length` a power of two.
    pub segment_file_length: i64,
    /// Flush each segment write durably as soon as it lands.
    pub force_writes: bool,
    /// Flush the descriptor's mapped page after every metadata update.
    pub force_metadata_updates: bool,
}

impl RecorderConfig {
    pub fn new(archive_dir: impl Into<PathBuf>, term_buffer_length: i32, segment_file_length: i64) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            term_buffer_length,
            segment_file_length,
            force_writes: false,
            force_metadata_updates: false,
        }
    }

    pub fn with_force_writes(mut self, force: bool) -> Self {
        self.force_writes = force;
        self
    }

    pub fn with_force_metadata_updates(mut self, force: bool) -> Self {
        self.force_metadata_updates = force;
        self
    }
}

/// Timing knobs for a replay session.
#[derive(Debug, Clone, Copy)]
pub struct ReplayConfig {
    pub linger_length_ms: i64,
    pub send_batch_size: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            linger_length_ms: DEFAULT_LINGER_LENGTH_MS,
            send_batch_size: DEFAULT_REPLAY_SEND_BATCH_SIZE,
        }
    }
}
