//! The recorder: a stateful, single-writer ingest path for one recording
//! (§4.4).
//!
//! `Recorder` is a `BlockHandler` so a recording session can hand it
//! straight to `Image::raw_poll`; `on_fragment` is the single-frame
//! equivalent for callers that only have an in-memory buffer. Both run the
//! exact same write state machine, including first-write bootstrap, so
//! pure-fragment recording never gets the latent-bootstrap bug the design
//! notes call out for the source implementation (§9).

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::RecorderConfig;
use crate::descriptor::{DescriptorWriter, NewDescriptor, RecordingDescriptor};
use crate::error::{ArchiveError, ArchiveResult};
use crate::layout;
use crate::position::Geometry;
use crate::transport::{Block, BlockHandler, StreamIdentity};

/// Read-only snapshot of a recorder's progress, for catalog/notification use
/// without holding the descriptor mapping open.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordingStats {
    pub bytes_recorded: u64,
    pub segment_count: u64,
    pub duration_ms: Option<i64>,
}

/// Stateful writer for one recording. Exclusively owned by a recording
/// session for the recording's entire active life.
pub struct Recorder {
    recording_id: u64,
    archive_dir: std::path::PathBuf,
    geometry: Geometry,
    descriptor: DescriptorWriter,
    config: RecorderConfig,
    clock: Arc<dyn Clock>,

    recording_position: i64,
    segment_index: u64,
    segment_file: Option<File>,
    initial_position: Option<u64>,
    last_position: u64,
    start_time_ms: Option<i64>,

    stopped: bool,
    closed: bool,
}

impl Recorder {
    /// Creates the metadata file exclusively and prepares to accept the
    /// first write. Fails with [`ArchiveError::AlreadyExists`] if a
    /// recording with this id already has a metadata file.
    pub fn new(
        recording_id: u64,
        config: RecorderConfig,
        identity: StreamIdentity,
        initial_term_id: i32,
        clock: Arc<dyn Clock>,
    ) -> ArchiveResult<Self> {
        let geometry = Geometry::new(config.term_buffer_length, config.segment_file_length, initial_term_id)?;

        let metadata_path = layout::metadata_path(&config.archive_dir, recording_id);
        let descriptor = DescriptorWriter::create(
            &metadata_path,
            NewDescriptor {
                recording_id,
                term_buffer_length: config.term_buffer_length,
                segment_file_length: config.segment_file_length,
                mtu_length: identity.mtu_length,
                initial_term_id,
                session_id: identity.session_id,
                stream_id: identity.stream_id,
                source: identity.source,
                channel: identity.channel,
            },
        )?;

        Ok(Self {
            recording_id,
            archive_dir: config.archive_dir.clone(),
            geometry,
            descriptor,
            config,
            clock,
            recording_position: -1,
            segment_index: 0,
            segment_file: None,
            initial_position: None,
            last_position: 0,
            start_time_ms: None,
            stopped: false,
            closed: false,
        })
    }

    pub fn recording_id(&self) -> u64 {
        self.recording_id
    }

    pub fn initial_position(&self) -> Option<u64> {
        self.initial_position
    }

    pub fn last_position(&self) -> u64 {
        self.last_position
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn stats(&self) -> RecordingStats {
        RecordingStats {
            bytes_recorded: self.initial_position.map(|ip| self.last_position.saturating_sub(ip)).unwrap_or(0),
            segment_count: self.segment_index + 1,
            duration_ms: self.start_time_ms.map(|start| self.clock.now_ms() - start),
        }
    }

    /// Single-frame write path using an in-memory buffer. `buffer` is the
    /// already-framed bytes (header + payload + padding) for exactly one
    /// frame at `(term_id, term_offset)`.
    pub fn on_fragment(&mut self, buffer: &[u8], term_offset: i32, term_id: i32) -> ArchiveResult<()> {
        let length = buffer.len() as i32;
        self.write(term_id, term_offset, length, |file| file.write_all(buffer))
    }

    fn ensure_open(&self, what: &'static str) -> ArchiveResult<()> {
        if self.closed {
            return Err(ArchiveError::Closed(what));
        }
        Ok(())
    }

    /// Runs the write state machine (§4.4 steps 1-8) for one accepted write
    /// of `length` bytes at `(term_id, term_offset)`, delegating the actual
    /// byte transfer to `copy` once all validation has passed.
    fn write(
        &mut self,
        term_id: i32,
        term_offset: i32,
        length: i32,
        copy: impl FnOnce(&mut File) -> std::io::Result<()>,
    ) -> ArchiveResult<()> {
        self.ensure_open("recorder")?;

        let (_seg_index, seg_offset) = self.geometry.segment_location(term_id, term_offset);

        if self.recording_position < 0 {
            if term_id != self.geometry.initial_term_id {
                self.closed = true;
                return Err(ArchiveError::OutOfOrderStart {
                    expected: self.geometry.initial_term_id,
                    actual: term_id,
                });
            }
        } else if seg_offset != self.recording_position as u64 {
            self.closed = true;
            return Err(ArchiveError::NonContiguous {
                recorder_position: self.recording_position as u64,
                write_offset: seg_offset,
            });
        }

        if term_offset + length > self.geometry.term_buffer_length {
            self.closed = true;
            return Err(ArchiveError::CrossesTerm {
                term_offset,
                length,
                term_buffer_length: self.geometry.term_buffer_length,
            });
        }

        if self.recording_position < 0 {
            self.bootstrap_first_write(term_id, term_offset).map_err(|e| {
                self.closed = true;
                e
            })?;
        }

        let file = self.segment_file.as_mut().expect("segment open after bootstrap");
        if let Err(e) = copy(file) {
            self.closed = true;
            return Err(ArchiveError::Io(e));
        }

        if self.config.force_writes {
            if let Err(e) = file.sync_data() {
                self.closed = true;
                return Err(ArchiveError::Io(e));
            }
        }

        self.recording_position += length as i64;
        let last_position = self.geometry.position(term_id, term_offset) + length as u64;
        self.last_position = last_position;
        self.descriptor.set_last_position(last_position as i64);
        if self.config.force_metadata_updates {
            self.descriptor.flush().map_err(|e| {
                self.closed = true;
                e
            })?;
        }

        log::debug!("recording {} advanced to position {last_position}", self.recording_id);

        if self.recording_position == self.geometry.segment_file_length {
            self.roll_segment().map_err(|e| {
                self.closed = true;
                e
            })?;
        }

        Ok(())
    }

    fn bootstrap_first_write(&mut self, term_id: i32, term_offset: i32) -> ArchiveResult<()> {
        let path = layout::segment_path(&self.archive_dir, self.recording_id, 0);
        let mut file = layout::create_segment_file(&path, self.geometry.segment_file_length as u64)?;
        file.seek(SeekFrom::Start(term_offset as u64))?;

        let initial_position = self.geometry.position(term_id, term_offset);
        let start_time = self.clock.now_ms();

        self.descriptor.set_initial_position(initial_position as i64);
        self.descriptor.set_start_time(start_time);

        self.segment_file = Some(file);
        self.segment_index = 0;
        self.recording_position = term_offset as i64;
        self.initial_position = Some(initial_position);
        self.start_time_ms = Some(start_time);

        log::info!("recording {} started at position {initial_position}", self.recording_id);
        Ok(())
    }

    fn roll_segment(&mut self) -> ArchiveResult<()> {
        self.segment_file = None;
        self.segment_index += 1;
        let path = layout::segment_path(&self.archive_dir, self.recording_id, self.segment_index);
        let file = layout::create_segment_file(&path, self.geometry.segment_file_length as u64)?;
        self.segment_file = Some(file);
        self.recording_position = 0;
        log::info!("recording {} rolled to segment {}", self.recording_id, self.segment_index);
        Ok(())
    }

    /// Sets `endTime` and flushes the descriptor. Safe to call more than
    /// once; only the first call has an effect.
    pub fn stop(&mut self) -> ArchiveResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.descriptor.set_end_time(self.clock.now_ms());
        self.descriptor.flush()?;
        self.stopped = true;
        Ok(())
    }

    /// Reads back the descriptor as it currently stands on the mapping, for
    /// the recording session to push progress into the catalog.
    pub fn descriptor_snapshot(&self) -> ArchiveResult<RecordingDescriptor> {
        self.descriptor.snapshot()
    }

    /// Idempotent: ensures `stop()` ran, drops the segment handle and
    /// metadata mapping.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.stop();
        self.segment_file = None;
        self.closed = true;
        log::info!("recorder for recording {} closed", self.recording_id);
    }
}

impl BlockHandler for Recorder {
    fn on_block(&mut self, block: Block<'_>) -> ArchiveResult<()> {
        let length = block.block_length();
        let term_id = block.term_id;
        let term_offset = block.term_offset;
        match block.source_file {
            Some((file, offset)) => {
                let mut buf = vec![0u8; length as usize];
                read_file_at(file, offset, &mut buf)?;
                self.write(term_id, term_offset, length, |dest| dest.write_all(&buf))
            }
            None => {
                let bytes = block.term_buffer;
                self.write(term_id, term_offset, length, |dest| dest.write_all(bytes))
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(unix)]
fn read_file_at(file: &File, offset: u64, buf: &mut [u8]) -> ArchiveResult<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset).map_err(ArchiveError::Io)
}

#[cfg(windows)]
fn read_file_at(file: &File, offset: u64, buf: &mut [u8]) -> ArchiveResult<()> {
    use std::os::windows::fs::FileExt;
    let mut read = 0usize;
    while read < buf.len() {
        let n = file.seek_read(&mut buf[read..], offset + read as u64)?;
        if n == 0 {
            return Err(ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read transferring block from source file",
            )));
        }
        read += n;
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn read_file_at(_file: &File, _offset: u64, _buf: &mut [u8]) -> ArchiveResult<()> {
    Err(ArchiveError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "file-backed block transfer is not supported on this platform",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::frame::encode_frame;
    use tempfile::tempdir;

    fn identity() -> StreamIdentity {
        StreamIdentity {
            source: "127.0.0.1:40001".to_string(),
            session_id: 99,
            channel: "test-channel".to_string(),
            stream_id: 10,
            mtu_length: 1408,
        }
    }

    fn recorder(dir: &std::path::Path, term_buffer_length: i32, segment_file_length: i64, initial_term_id: i32) -> Recorder {
        let config = RecorderConfig::new(dir, term_buffer_length, segment_file_length);
        Recorder::new(1, config, identity(), initial_term_id, Arc::new(ManualClock::new(1_000))).unwrap()
    }

    #[test]
    fn s1_basic_record() {
        let dir = tempdir().unwrap();
        let mut rec = recorder(dir.path(), 4096, 16384, 7);

        let f1 = encode_frame(7, 0, 99, 0, 0, 0, &[1u8; 32]);
        let f1_len = f1.len() as i32;
        rec.on_fragment(&f1, 0, 7).unwrap();

        let f2 = encode_frame(7, f1_len, 99, 0, 0, 0, &[2u8; 32]);
        rec.on_fragment(&f2, f1_len, 7).unwrap();

        assert_eq!(rec.initial_position(), Some(0));
        assert_eq!(rec.last_position(), (f1.len() + f2.len()) as u64);

        rec.stop().unwrap();
        let snapshot = rec.descriptor_snapshot().unwrap();
        assert_eq!(snapshot.initial_position, 0);
        assert_eq!(snapshot.last_position, rec.last_position() as i64);
        assert_eq!(snapshot.start_time, 1_000);
        assert_eq!(snapshot.end_time, 1_000);
    }

    #[test]
    fn s2_segment_rollover() {
        let dir = tempdir().unwrap();
        let mut rec = recorder(dir.path(), 1024, 2048, 0);

        // Two 1024-byte blocks exactly fill the 2048-byte segment.
        rec.on_fragment(&[0xAAu8; 1024], 0, 0).unwrap();
        rec.on_fragment(&[0xBBu8; 1024], 1024, 0).unwrap();

        let seg1 = layout::segment_path(dir.path(), 1, 1);
        assert!(seg1.exists());
        assert_eq!(std::fs::metadata(&seg1).unwrap().len(), 2048);
        assert_eq!(rec.stats().segment_count, 2);
    }

    #[test]
    fn s3_out_of_order_start_fails_and_closes() {
        let dir = tempdir().unwrap();
        let mut rec = recorder(dir.path(), 4096, 16384, 5);

        let err = rec.on_fragment(&[0u8; 64], 0, 6).unwrap_err();
        assert!(matches!(err, ArchiveError::OutOfOrderStart { expected: 5, actual: 6 }));
        assert!(rec.is_closed());

        let snapshot_path = layout::metadata_path(dir.path(), 1);
        let descriptor = crate::descriptor::read_descriptor(&snapshot_path).unwrap();
        assert_eq!(descriptor.start_time, crate::descriptor::UNSET);
    }

    #[test]
    fn s6_contiguity_violation() {
        let dir = tempdir().unwrap();
        let mut rec = recorder(dir.path(), 4096, 16384, 0);

        rec.on_fragment(&[0u8; 256], 0, 0).unwrap();
        let err = rec.on_fragment(&[0u8; 256], 512, 0).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::NonContiguous {
                recorder_position: 256,
                write_offset: 512
            }
        ));
        assert!(rec.is_closed());
    }

    #[test]
    fn crosses_term_is_rejected() {
        let dir = tempdir().unwrap();
        let mut rec = recorder(dir.path(), 1024, 2048, 0);
        let err = rec.on_fragment(&[0u8; 100], 1000, 0).unwrap_err();
        assert!(matches!(err, ArchiveError::CrossesTerm { .. }));
    }

    #[test]
    fn writes_after_close_are_rejected() {
        let dir = tempdir().unwrap();
        let mut rec = recorder(dir.path(), 4096, 16384, 0);
        rec.close();
        let err = rec.on_fragment(&[0u8; 64], 0, 0).unwrap_err();
        assert!(matches!(err, ArchiveError::Closed("recorder")));
    }
}
