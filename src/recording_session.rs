//! Recording session state machine (§4.6): **INIT → RECORDING → INACTIVE →
//! CLOSED**, driven by repeated `do_work()` calls from a cooperative
//! conductor (out of scope here, see §5).

use std::sync::{Arc, Mutex};

use crate::catalog::Catalog;
use crate::clock::Clock;
use crate::config::RecorderConfig;
use crate::error::ArchiveResult;
use crate::notifications::Notifications;
use crate::recorder::Recorder;
use crate::transport::{Image, StreamIdentity};

/// Bytes requested per `Image::raw_poll` call. Bounds one tick's block-ingest
/// work the way the replay side bounds a tick to `REPLAY_SEND_BATCH_SIZE`
/// fragments.
const BLOCK_POLL_BYTE_LIMIT: i32 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Init,
    Recording,
    Inactive,
    Closed,
}

/// Owns one recording's upstream image and recorder for its entire active
/// life. Constructed once per recording; the conductor ticks it via
/// `do_work()` until it reports `Closed`.
pub struct RecordingSession {
    state: RecordingState,
    image: Box<dyn Image>,
    recorder: Option<Recorder>,
    recording_id: Option<u64>,
    config: RecorderConfig,
    catalog: Arc<Mutex<dyn Catalog>>,
    notifications: Box<dyn Notifications>,
    clock: Arc<dyn Clock>,
    abort_requested: bool,
}

impl RecordingSession {
    pub fn new(
        image: Box<dyn Image>,
        config: RecorderConfig,
        catalog: Arc<Mutex<dyn Catalog>>,
        notifications: Box<dyn Notifications>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: RecordingState::Init,
            image,
            recorder: None,
            recording_id: None,
            config,
            catalog,
            notifications,
            clock,
            abort_requested: false,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn recording_id(&self) -> Option<u64> {
        self.recording_id
    }

    pub fn is_closed(&self) -> bool {
        self.state == RecordingState::Closed
    }

    /// Requests the session wind down; honoured at the start of the next
    /// `do_work()` tick regardless of current state.
    pub fn abort(&mut self) {
        self.abort_requested = true;
    }

    /// Performs one bounded unit of work for whatever state the session is
    /// currently in. Never blocks.
    pub fn do_work(&mut self) -> ArchiveResult<()> {
        if self.abort_requested && !matches!(self.state, RecordingState::Inactive | RecordingState::Closed) {
            self.abort_requested = false;
            self.state = RecordingState::Inactive;
            return Ok(());
        }

        match self.state {
            RecordingState::Init => self.do_init(),
            RecordingState::Recording => self.do_recording(),
            RecordingState::Inactive => self.do_inactive(),
            RecordingState::Closed => Ok(()),
        }
    }

    fn do_init(&mut self) -> ArchiveResult<()> {
        let identity = StreamIdentity {
            source: self.image.source_identity().to_string(),
            session_id: self.image.session_id(),
            channel: self.image.channel().to_string(),
            stream_id: self.image.stream_id(),
            mtu_length: self.image.mtu_length(),
        };

        let recording_id = match self.catalog.lock().unwrap().add_new_recording(&identity) {
            Ok(id) => id,
            Err(e) => {
                log::warn!("recording session failed to register: {e}");
                self.state = RecordingState::Inactive;
                return Ok(());
            }
        };

        self.notifications.recording_started(recording_id, &identity);

        let recorder = match Recorder::new(
            recording_id,
            self.config.clone(),
            identity,
            self.image.initial_term_id(),
            self.clock.clone(),
        ) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("recording {recording_id} failed to start: {e}");
                self.recording_id = Some(recording_id);
                self.state = RecordingState::Inactive;
                return Ok(());
            }
        };

        self.recording_id = Some(recording_id);
        self.recorder = Some(recorder);
        self.state = RecordingState::Recording;
        Ok(())
    }

    fn do_recording(&mut self) -> ArchiveResult<()> {
        let recording_id = self.recording_id.expect("recording_id set entering Recording");
        let recorder = self.recorder.as_mut().expect("recorder present in Recording state");

        let before = recorder.last_position();
        if let Err(e) = self.image.raw_poll(recorder, BLOCK_POLL_BYTE_LIMIT) {
            log::warn!("recording {recording_id} failed: {e}");
            self.state = RecordingState::Inactive;
            return Ok(());
        }
        let after = recorder.last_position();

        if after > before {
            if let Some(initial) = recorder.initial_position() {
                self.notifications.recording_progress(recording_id, initial, after);
            }
        }

        if self.image.is_closed() {
            self.state = RecordingState::Inactive;
        }
        Ok(())
    }

    fn do_inactive(&mut self) -> ArchiveResult<()> {
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.stop() {
                log::warn!("error stopping recorder: {e}");
            }
            if let (Some(id), Ok(snapshot)) = (self.recording_id, recorder.descriptor_snapshot()) {
                let mut catalog = self.catalog.lock().unwrap();
                if let Err(e) = catalog.update_catalog_from_meta(id, &snapshot) {
                    log::warn!("failed to update catalog for recording {id}: {e}");
                }
                catalog.remove_recording_session(id);
            }
            recorder.close();
        }

        if let Some(id) = self.recording_id {
            self.notifications.recording_stopped(id);
        }

        self.state = RecordingState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::clock::ManualClock;
    use crate::frame::encode_frame;
    use crate::notifications::LoggingNotifications;
    use crate::transport::{Block, BlockHandler};
    use tempfile::tempdir;

    struct FakeImage {
        pending: Vec<Vec<u8>>,
        term_id: i32,
        term_offset: i32,
        closed: bool,
    }

    impl Image for FakeImage {
        fn term_buffer_length(&self) -> i32 {
            4096
        }
        fn initial_term_id(&self) -> i32 {
            0
        }
        fn mtu_length(&self) -> i32 {
            1408
        }
        fn session_id(&self) -> i32 {
            99
        }
        fn source_identity(&self) -> &str {
            "127.0.0.1:40001"
        }
        fn channel(&self) -> &str {
            "test-channel"
        }
        fn stream_id(&self) -> i32 {
            10
        }
        fn is_closed(&self) -> bool {
            self.closed
        }

        fn raw_poll(&mut self, handler: &mut dyn BlockHandler, _byte_limit: i32) -> ArchiveResult<i32> {
            let Some(buf) = self.pending.pop() else {
                return Ok(0);
            };
            let len = buf.len() as i32;
            handler.on_block(Block {
                term_buffer: &buf,
                source_file: None,
                session_id: 99,
                term_id: self.term_id,
                term_offset: self.term_offset,
            })?;
            self.term_offset += len;
            Ok(len)
        }
    }

    #[test]
    fn runs_init_through_closed_on_image_close() {
        let dir = tempdir().unwrap();
        let frame = encode_frame(0, 0, 99, 0, 0, 0, b"hello");
        let image = Box::new(FakeImage {
            pending: vec![frame],
            term_id: 0,
            term_offset: 0,
            closed: false,
        });
        let config = RecorderConfig::new(dir.path(), 4096, 16384);
        let catalog: Arc<Mutex<dyn Catalog>> = Arc::new(Mutex::new(InMemoryCatalog::new()));
        let clock = Arc::new(ManualClock::new(1_000));

        let mut session = RecordingSession::new(
            image,
            config,
            catalog.clone(),
            Box::new(LoggingNotifications),
            clock,
        );

        session.do_work().unwrap();
        assert_eq!(session.state(), RecordingState::Recording);
        let recording_id = session.recording_id().unwrap();
        assert!(catalog.lock().unwrap().is_active(recording_id));

        session.do_work().unwrap();
        assert_eq!(session.state(), RecordingState::Recording);

        session.abort();
        session.do_work().unwrap();
        assert_eq!(session.state(), RecordingState::Inactive);

        session.do_work().unwrap();
        assert_eq!(session.state(), RecordingState::Closed);
        assert!(!catalog.lock().unwrap().is_active(recording_id));
    }
}
