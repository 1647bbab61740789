//! Minimal external-collaborator interfaces (§6).
//!
//! The transport layer itself (publications, subscriptions, images) is out
//! of scope; these traits exist only to pin the admission/emission seams the
//! core depends on. A real media driver implements them against its own
//! term-buffer and flow-control machinery; tests implement them with plain
//! in-memory stand-ins.

use std::fs::File;

use crate::error::ArchiveResult;

/// Upstream stream coordinates and origin identity, fixed for a recording's
/// whole life.
#[derive(Debug, Clone)]
pub struct StreamIdentity {
    pub source: String,
    pub session_id: i32,
    pub channel: String,
    pub stream_id: i32,
    pub mtu_length: i32,
}

/// One delivered block of already-framed stream bytes, as handed to a
/// recorder by `Image::raw_poll`.
///
/// `source_file` is populated when the image's underlying log buffer is
/// itself file-backed, letting the recorder prefer a file-to-file transfer
/// over a user-space copy; `term_buffer` is always available as the
/// in-memory fallback view of the same bytes.
pub struct Block<'a> {
    pub term_buffer: &'a [u8],
    pub source_file: Option<(&'a File, u64)>,
    pub session_id: i32,
    pub term_id: i32,
    pub term_offset: i32,
}

impl<'a> Block<'a> {
    pub fn block_length(&self) -> i32 {
        self.term_buffer.len() as i32
    }
}

/// Receives blocks delivered by `Image::raw_poll`. A `Recorder` implements
/// this to ingest the live stream (§4.4).
pub trait BlockHandler {
    fn on_block(&mut self, block: Block<'_>) -> ArchiveResult<()>;
}

/// The upstream image contract: everything a recording session needs from
/// the subscription it is recording.
pub trait Image {
    fn term_buffer_length(&self) -> i32;
    fn initial_term_id(&self) -> i32;
    fn mtu_length(&self) -> i32;
    fn session_id(&self) -> i32;
    fn source_identity(&self) -> &str;
    fn channel(&self) -> &str;
    fn stream_id(&self) -> i32;
    fn is_closed(&self) -> bool;

    /// Delivers newly available blocks to `handler`, each call bounded by
    /// `byte_limit` total bytes; returns the number of bytes delivered (0 if
    /// nothing was available). Never blocks.
    fn raw_poll(&mut self, handler: &mut dyn BlockHandler, byte_limit: i32) -> ArchiveResult<i32>;
}

/// Per-frame metadata the replay session supplies when committing a claim,
/// carried over unchanged from the original recorded frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameMeta {
    pub flags: u8,
    pub reserved_value: i64,
    pub frame_type: i32,
}

/// Outcome of `OutboundPublication::try_claim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    /// Claimed, written and committed; carries the resulting stream position.
    Reserved(i64),
    /// No buffer room right now; try again next tick.
    BackPressured,
    /// No subscriber connected yet.
    NotConnected,
    /// The publication has been closed.
    Closed,
}

/// The outbound publication contract replay sessions write into.
///
/// Modelled as a single transactional call rather than Aeron's two-step
/// claim/commit so the reserved buffer never needs to outlive the call that
/// produced it. The closure is invoked exactly once, iff the claim
/// succeeds, and its return value supplies the header fields the caller
/// preserves from the original recorded frame.
pub trait OutboundPublication {
    fn is_connected(&self) -> bool;
    fn is_closed(&self) -> bool;

    fn try_claim(
        &mut self,
        length: i32,
        write: &mut dyn FnMut(&mut [u8]) -> FrameMeta,
    ) -> ArchiveResult<ClaimStatus>;
}
