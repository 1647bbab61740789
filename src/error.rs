//! Unified error handling for the archive engine.
//!
//! Mirrors the recorder/cursor/session error taxonomy: one variant per
//! failure domain so callers can match on kind rather than message text.

use thiserror::Error;

/// Main error type for recording and replay operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// I/O related errors (disk, mmap, segment files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// First block of a recording arrived on the wrong term.
    #[error("out-of-order start: expected initial term {expected}, got {actual}")]
    OutOfOrderStart { expected: i32, actual: i32 },

    /// A write's segment offset does not follow the recorder's cursor.
    #[error("non-contiguous write: recorder at {recorder_position}, write targets {write_offset}")]
    NonContiguous {
        recorder_position: u64,
        write_offset: u64,
    },

    /// A write would straddle a term boundary.
    #[error("write crosses term boundary: offset {term_offset} + length {length} > term buffer length {term_buffer_length}")]
    CrossesTerm {
        term_offset: i32,
        length: i32,
        term_buffer_length: i32,
    },

    /// Replay target recording has no descriptor on disk.
    #[error("recording {0} not found")]
    NotFound(u64),

    /// Replay requested a position before the recording's initial position.
    #[error("replay position {requested} is before recording start {initial_position}")]
    BeforeStart {
        requested: u64,
        initial_position: u64,
    },

    /// Replay requested a range extending past the recorded end.
    #[error("replay range [{from}, {from}+{length}) extends past recorded end {last_position}")]
    PastEnd {
        from: u64,
        length: u64,
        last_position: u64,
    },

    /// The cursor failed to open the segment file it needed.
    #[error("failed to open cursor for recording {recording_id}: {message}")]
    CursorOpenFailed { recording_id: u64, message: String },

    /// The outbound publication for a replay closed or disconnected mid-stream.
    #[error("replay peer gone for recording {0}")]
    ReplayPeerGone(u64),

    /// A recording with this id already admits a live writer.
    #[error("recording {0} already has an active recorder")]
    AlreadyRecording(u64),

    /// Metadata file for this recording id already exists.
    #[error("recording {0} already exists")]
    AlreadyExists(u64),

    /// Descriptor bytes on disk do not match the expected schema.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// A caller passed arguments that fail validation (e.g. non-power-of-two length).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A write or poll was attempted on a recorder/cursor that has already closed.
    #[error("{0} is closed")]
    Closed(&'static str),
}

/// Convenience alias for Results using [`ArchiveError`].
pub type ArchiveResult<T> = Result<T, ArchiveError>;

impl ArchiveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::NotFound(_))
    }

    pub fn is_contiguity_violation(&self) -> bool {
        matches!(
            self,
            ArchiveError::NonContiguous { .. } | ArchiveError::OutOfOrderStart { .. }
        )
    }
}
