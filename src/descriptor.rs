//! Recording descriptor: the fixed-size metadata block at the head of every
//! `<recordingId>.rec` file.
//!
//! Binary format: a `DescriptorHeader` (§6 "4-byte length prefix at file
//! offset 0 followed by fixed-order scalar fields"), immediately followed by
//! the `source` and `channel` strings (written once, never resized), the
//! whole thing padded to at least [`MIN_DESCRIPTOR_FILE_LENGTH`] bytes so it
//! can be memory-mapped and point-updated.
//!
//! Only `initial_position`, `last_position`, `start_time`, `end_time` and the
//! header `length` are ever rewritten after creation; `DescriptorWriter`
//! exposes exactly those as in-place setters on the live mapping.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::error::{ArchiveError, ArchiveResult};

/// Current descriptor schema version.
pub const DESCRIPTOR_VERSION: u32 = 1;

/// Metadata files are padded to at least this many bytes.
pub const MIN_DESCRIPTOR_FILE_LENGTH: u64 = 4096;

/// Sentinel for `start_time` / `end_time` / `initial_position` / `last_position`
/// fields that have not been set yet.
pub const UNSET: i64 = -1;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct DescriptorHeader {
    /// Total encoded length of header + strings (the "4-byte length prefix").
    length: u32,
    version: u32,
    recording_id: u64,
    segment_file_length: i64,
    start_time: i64,
    end_time: i64,
    initial_position: i64,
    last_position: i64,
    term_buffer_length: i32,
    mtu_length: i32,
    initial_term_id: i32,
    session_id: i32,
    stream_id: i32,
    source_length: u32,
    channel_length: u32,
    _padding: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<DescriptorHeader>();

/// Scalar identity fields fixed at descriptor creation time.
#[derive(Debug, Clone)]
pub struct NewDescriptor {
    pub recording_id: u64,
    pub term_buffer_length: i32,
    pub segment_file_length: i64,
    pub mtu_length: i32,
    pub initial_term_id: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub source: String,
    pub channel: String,
}

/// Fully decoded descriptor, owned and detached from any mapping: what a
/// replay session or the catalog reads back.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingDescriptor {
    pub recording_id: u64,
    pub term_buffer_length: i32,
    pub segment_file_length: i64,
    pub mtu_length: i32,
    pub initial_term_id: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub source: String,
    pub channel: String,
    pub start_time: i64,
    pub end_time: i64,
    pub initial_position: i64,
    pub last_position: i64,
}

impl RecordingDescriptor {
    fn from_header_and_strings(header: &DescriptorHeader, source: String, channel: String) -> Self {
        Self {
            recording_id: header.recording_id,
            term_buffer_length: header.term_buffer_length,
            segment_file_length: header.segment_file_length,
            mtu_length: header.mtu_length,
            initial_term_id: header.initial_term_id,
            session_id: header.session_id,
            stream_id: header.stream_id,
            source,
            channel,
            start_time: header.start_time,
            end_time: header.end_time,
            initial_position: header.initial_position,
            last_position: header.last_position,
        }
    }
}

fn decode_header_and_strings(bytes: &[u8], path_for_errors: &Path) -> ArchiveResult<(DescriptorHeader, String, String)> {
    if bytes.len() < HEADER_SIZE {
        return Err(ArchiveError::InvalidDescriptor(format!(
            "{path_for_errors:?} is smaller than the descriptor header ({} bytes)",
            HEADER_SIZE
        )));
    }
    // Copy into an aligned local buffer: the mmap base is page-aligned so this
    // is not strictly required at offset 0, but it keeps this path robust if
    // the header is ever read out of a buffer with weaker alignment.
    let mut header: DescriptorHeader = bytemuck::Zeroable::zeroed();
    bytemuck::bytes_of_mut(&mut header).copy_from_slice(&bytes[..HEADER_SIZE]);

    if header.version != DESCRIPTOR_VERSION {
        return Err(ArchiveError::InvalidDescriptor(format!(
            "unsupported descriptor version {} in {path_for_errors:?}",
            header.version
        )));
    }

    let source_start = HEADER_SIZE;
    let source_end = source_start + header.source_length as usize;
    let channel_end = source_end + header.channel_length as usize;
    if channel_end > bytes.len() {
        return Err(ArchiveError::InvalidDescriptor(format!(
            "{path_for_errors:?} descriptor strings exceed file length"
        )));
    }
    let source = String::from_utf8_lossy(&bytes[source_start..source_end]).into_owned();
    let channel = String::from_utf8_lossy(&bytes[source_end..channel_end]).into_owned();
    Ok((header, source, channel))
}

/// A writable, memory-mapped handle to one recording's metadata file.
/// Exclusively owned by the recorder for the recording's active life.
pub struct DescriptorWriter {
    mmap: MmapMut,
    _file: File,
}

impl DescriptorWriter {
    /// Creates the metadata file exclusively (fails if it already exists),
    /// writes the descriptor with every position/time field set to
    /// [`UNSET`], and maps it read-write.
    pub fn create(path: &Path, fields: NewDescriptor) -> ArchiveResult<Self> {
        let source_bytes = fields.source.as_bytes();
        let channel_bytes = fields.channel.as_bytes();
        let encoded_length = HEADER_SIZE + source_bytes.len() + channel_bytes.len();
        let file_length = encoded_length.max(MIN_DESCRIPTOR_FILE_LENGTH as usize) as u64;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    ArchiveError::AlreadyExists(fields.recording_id)
                } else {
                    ArchiveError::Io(e)
                }
            })?;
        file.set_len(file_length)?;

        let mut mmap = unsafe { MmapOptions::new().len(file_length as usize).map_mut(&file)? };

        let header = DescriptorHeader {
            length: encoded_length as u32,
            version: DESCRIPTOR_VERSION,
            recording_id: fields.recording_id,
            segment_file_length: fields.segment_file_length,
            start_time: UNSET,
            end_time: UNSET,
            initial_position: UNSET,
            last_position: UNSET,
            term_buffer_length: fields.term_buffer_length,
            mtu_length: fields.mtu_length,
            initial_term_id: fields.initial_term_id,
            session_id: fields.session_id,
            stream_id: fields.stream_id,
            source_length: source_bytes.len() as u32,
            channel_length: channel_bytes.len() as u32,
            _padding: 0,
        };

        mmap[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        mmap[HEADER_SIZE..HEADER_SIZE + source_bytes.len()].copy_from_slice(source_bytes);
        mmap[HEADER_SIZE + source_bytes.len()..encoded_length].copy_from_slice(channel_bytes);
        mmap.flush()?;

        Ok(Self { mmap, _file: file })
    }

    fn header_mut(&mut self) -> &mut DescriptorHeader {
        bytemuck::from_bytes_mut(&mut self.mmap[..HEADER_SIZE])
    }

    fn header(&self) -> &DescriptorHeader {
        bytemuck::from_bytes(&self.mmap[..HEADER_SIZE])
    }

    /// Sets `initialPosition`; called exactly once, on the first accepted
    /// write.
    pub fn set_initial_position(&mut self, position: i64) {
        self.header_mut().initial_position = position;
    }

    /// Sets `startTime`; called exactly once, on the first accepted write.
    pub fn set_start_time(&mut self, time_ms: i64) {
        self.header_mut().start_time = time_ms;
    }

    /// Sets `lastPosition`; called after every accepted write.
    pub fn set_last_position(&mut self, position: i64) {
        self.header_mut().last_position = position;
    }

    /// Sets `endTime`; called exactly once, at `stop()`.
    pub fn set_end_time(&mut self, time_ms: i64) {
        self.header_mut().end_time = time_ms;
    }

    /// Flushes the mapped metadata page to disk. The recorder calls this
    /// conditionally on `forceMetadataUpdates` after data-position updates,
    /// and unconditionally at `stop()`.
    pub fn flush(&self) -> ArchiveResult<()> {
        self.mmap.flush()?;
        Ok(())
    }

    /// Reads back the live mapping into an owned, detached snapshot, for
    /// pushing progress into the catalog without holding the mapping open.
    pub fn snapshot(&self) -> ArchiveResult<RecordingDescriptor> {
        let header = *self.header();
        let source_start = HEADER_SIZE;
        let source_end = source_start + header.source_length as usize;
        let channel_end = source_end + header.channel_length as usize;
        let source = String::from_utf8_lossy(&self.mmap[source_start..source_end]).into_owned();
        let channel = String::from_utf8_lossy(&self.mmap[source_end..channel_end]).into_owned();
        Ok(RecordingDescriptor::from_header_and_strings(&header, source, channel))
    }
}

/// Opens a recording's metadata file read-only and decodes it in full.
///
/// Readers (replay sessions, the catalog) never hold a live mapping; they
/// open a fresh read-only mapping, copy out the scalars and strings they
/// need, and let the mapping drop. A reader may observe a stale but
/// self-consistent snapshot if the recorder is still active and updates the
/// file concurrently: every in-place field is a single aligned scalar, so
/// torn reads are not possible for any individual field.
pub fn read_descriptor(path: &Path) -> ArchiveResult<RecordingDescriptor> {
    let file = OpenOptions::new().read(true).open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ArchiveError::NotFound(0)
        } else {
            ArchiveError::Io(e)
        }
    })?;
    let mmap: Mmap = unsafe { MmapOptions::new().map(&file)? };
    let (header, source, channel) = decode_header_and_strings(&mmap, path)?;
    Ok(RecordingDescriptor::from_header_and_strings(&header, source, channel))
}

/// Like [`read_descriptor`] but reports [`ArchiveError::NotFound`] carrying
/// the recording id (the bare file-open path above cannot know the id before
/// it has read the file).
pub fn read_descriptor_for_recording(archive_dir: &Path, recording_id: u64) -> ArchiveResult<RecordingDescriptor> {
    let path = crate::layout::metadata_path(archive_dir, recording_id);
    read_descriptor(&path).map_err(|e| match e {
        ArchiveError::NotFound(_) => ArchiveError::NotFound(recording_id),
        other => other,
    })
}
