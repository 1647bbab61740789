//! Fragment cursor (§4.5): replays a recording's frames in position order,
//! walking segment files read-only and bounded by `frameLimit`/`replayLength`.
//!
//! The cursor is the one component that decodes frame headers from disk;
//! the recorder never does, since the bytes it writes are already framed by
//! the transport. A cursor is single-threaded, forward-only and not
//! restartable once `is_done()`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::descriptor::read_descriptor_for_recording;
use crate::error::{ArchiveError, ArchiveResult};
use crate::frame::{decode_frame_header, FRAME_HEADER_LENGTH};
use crate::layout::{open_segment_file_read_only, segment_path};
use crate::position::Geometry;

/// One fragment the cursor hands to the consumer: the raw frame bytes
/// (header included) plus the decoded offsets the consumer needs to locate
/// the payload within them.
pub struct Fragment<'a> {
    pub buffer: &'a [u8],
    pub data_offset: usize,
    pub data_length: usize,
    pub term_offset: i32,
    pub term_id: i32,
    pub flags: u8,
    pub reserved_value: i64,
    pub frame_type: i32,
}

/// Receives fragments from [`Cursor::controlled_poll`]. Returning `false`
/// pauses polling and preserves the current offset for the next call (§4.5
/// step 3), used by the replay session to back off when the outbound
/// publication has no room.
pub trait FragmentConsumer {
    fn on_fragment(&mut self, fragment: Fragment<'_>) -> ArchiveResult<bool>;
}

/// Reads a recording's frames starting at `fromPosition`, bounded by
/// `replayLength` bytes.
pub struct Cursor {
    recording_id: u64,
    archive_dir: PathBuf,
    geometry: Geometry,
    segment_file_length: u64,
    segment_index: u64,
    segment_file: File,
    segment_offset: u64,
    remaining: i64,
    closed: bool,
}

impl Cursor {
    /// Opens a cursor at `from_position`, replaying up to `replay_length`
    /// bytes. Fails with [`ArchiveError::NotFound`] if the recording's
    /// descriptor is absent, or [`ArchiveError::CursorOpenFailed`] if the
    /// starting segment cannot be opened.
    pub fn open(
        recording_id: u64,
        archive_dir: impl Into<PathBuf>,
        from_position: u64,
        replay_length: i64,
    ) -> ArchiveResult<Self> {
        let archive_dir = archive_dir.into();
        let descriptor = read_descriptor_for_recording(&archive_dir, recording_id)?;

        let geometry = Geometry::new(
            descriptor.term_buffer_length,
            descriptor.segment_file_length,
            descriptor.initial_term_id,
        )?;

        let initial_position = descriptor.initial_position.max(0) as u64;
        let (segment_index, segment_offset) =
            geometry.segment_index_for_position(from_position, initial_position);

        let segment_file_length = descriptor.segment_file_length as u64;
        let path = segment_path(&archive_dir, recording_id, segment_index);
        let segment_file = open_segment_file_read_only(&path, segment_file_length).map_err(|e| {
            ArchiveError::CursorOpenFailed {
                recording_id,
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            recording_id,
            archive_dir,
            geometry,
            segment_file_length,
            segment_index,
            segment_file,
            segment_offset,
            remaining: replay_length,
            closed: false,
        })
    }

    pub fn recording_id(&self) -> u64 {
        self.recording_id
    }

    /// True once the replay length has been fully delivered, no frames
    /// remain, or the cursor has been closed.
    pub fn is_done(&self) -> bool {
        self.closed || self.remaining <= 0
    }

    /// Delivers up to `frame_limit` fragments to `consumer`, stopping early
    /// if the consumer refuses one, the segment runs dry (end-of-data
    /// sentinel), or `replayLength` is exhausted. Returns the number of
    /// fragments delivered.
    pub fn controlled_poll(
        &mut self,
        consumer: &mut dyn FragmentConsumer,
        frame_limit: usize,
    ) -> ArchiveResult<usize> {
        if self.is_done() {
            return Ok(0);
        }

        let mut delivered = 0usize;
        while delivered < frame_limit && self.remaining > 0 {
            let mut header_bytes = [0u8; FRAME_HEADER_LENGTH];
            self.segment_file.seek(SeekFrom::Start(self.segment_offset))?;
            self.segment_file.read_exact(&mut header_bytes)?;
            let header = decode_frame_header(&header_bytes)?;

            if header.frame_length == 0 {
                // End of written data for this segment/recording.
                self.remaining = 0;
                break;
            }

            let padded = header.padded_length() as u64;
            let bounded_length = padded.min(self.remaining as u64);

            let mut frame = vec![0u8; bounded_length as usize];
            self.segment_file.seek(SeekFrom::Start(self.segment_offset))?;
            self.segment_file.read_exact(&mut frame)?;

            let data_offset = FRAME_HEADER_LENGTH;
            let full_data_length = (header.frame_length as usize).saturating_sub(FRAME_HEADER_LENGTH);
            // `frame` is sized to `bounded_length`, which is clamped to the
            // cursor's remaining replay length and can end mid-frame (§8
            // property 5: `replayLength` need not be frame-aligned). Clamp
            // the reported data to what's actually in `frame` so consumers
            // that slice `buffer[data_offset..data_offset + data_length]`
            // never read past the end of the buffer.
            let data_length = full_data_length.min(frame.len().saturating_sub(data_offset));

            let fragment = Fragment {
                buffer: &frame,
                data_offset,
                data_length,
                term_offset: header.term_offset,
                term_id: header.term_id,
                flags: header.flags,
                reserved_value: header.reserved_value,
                frame_type: header.frame_type,
            };

            if !consumer.on_fragment(fragment)? {
                // Offset is untouched: the next call re-reads this same frame.
                break;
            }

            delivered += 1;
            self.remaining -= bounded_length as i64;
            self.segment_offset += padded;

            if self.segment_offset >= self.segment_file_length {
                self.roll_segment()?;
            }

            if self.remaining <= 0 {
                break;
            }
        }

        Ok(delivered)
    }

    fn roll_segment(&mut self) -> ArchiveResult<()> {
        self.segment_index += 1;
        self.segment_offset = 0;
        let path = segment_path(&self.archive_dir, self.recording_id, self.segment_index);
        self.segment_file = open_segment_file_read_only(&path, self.segment_file_length)?;
        Ok(())
    }

    /// Releases the open segment handle. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}
