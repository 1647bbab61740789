//! Replay session state machine (§4.7): **INIT → REPLAY → LINGER → INACTIVE
//! → CLOSED**, driven by repeated `do_work()` calls from a cooperative
//! conductor.

use std::path::PathBuf;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::ReplayConfig;
use crate::cursor::{Cursor, Fragment, FragmentConsumer};
use crate::descriptor::read_descriptor_for_recording;
use crate::error::{ArchiveError, ArchiveResult};
use crate::transport::{ClaimStatus, FrameMeta, OutboundPublication};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Init,
    Replay,
    Linger,
    Inactive,
    Closed,
}

/// A replay request as handed to the session at construction (§4.7).
#[derive(Debug, Clone)]
pub struct ReplayRequest {
    pub recording_id: u64,
    pub from_position: u64,
    pub replay_length: i64,
    pub replay_channel: String,
    pub replay_stream_id: i32,
    pub correlation_id: i64,
}

/// Parameters the session derives from the recording's descriptor once it is
/// open, so the outbound publication is bit-identical in framing and
/// position arithmetic to the original (§4.7 step 4).
#[derive(Debug, Clone, Copy)]
pub struct PublicationParams {
    pub from_position: u64,
    pub mtu_length: i32,
    pub initial_term_id: i32,
    pub term_buffer_length: i32,
}

/// Builds the outbound publication once the descriptor is known. Boxed and
/// `FnOnce` because the session only ever needs one, and only after INIT has
/// validated the request; building the publication (and whatever channel
/// binding it implies) is the one piece of transport setup this module
/// doesn't own (§1).
pub type PublicationFactory = Box<dyn FnOnce(PublicationParams) -> ArchiveResult<Box<dyn OutboundPublication>>>;

/// Sends the control-plane response for a replay request and reports whether
/// the control channel is still connected to send on.
pub trait ControlResponder {
    fn send_ok(&mut self, correlation_id: i64);
    fn send_error(&mut self, correlation_id: i64, message: &str);
    fn is_connected(&self) -> bool;
}

pub struct ReplaySession {
    state: ReplayState,
    request: ReplayRequest,
    archive_dir: PathBuf,
    publication_factory: Option<PublicationFactory>,
    publication: Option<Box<dyn OutboundPublication>>,
    cursor: Option<Cursor>,
    control: Box<dyn ControlResponder>,
    clock: Arc<dyn Clock>,
    config: ReplayConfig,
    created_at_ms: i64,
    linger_since_ms: Option<i64>,
}

impl ReplaySession {
    pub fn new(
        request: ReplayRequest,
        archive_dir: impl Into<PathBuf>,
        publication_factory: PublicationFactory,
        control: Box<dyn ControlResponder>,
        clock: Arc<dyn Clock>,
        config: ReplayConfig,
    ) -> Self {
        let created_at_ms = clock.now_ms();
        Self {
            state: ReplayState::Init,
            request,
            archive_dir: archive_dir.into(),
            publication_factory: Some(publication_factory),
            publication: None,
            cursor: None,
            control,
            clock,
            config,
            created_at_ms,
            linger_since_ms: None,
        }
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ReplayState::Closed
    }

    pub fn do_work(&mut self) -> ArchiveResult<()> {
        match self.state {
            ReplayState::Init => self.do_init(),
            ReplayState::Replay => self.do_replay(),
            ReplayState::Linger => self.do_linger(),
            ReplayState::Inactive => self.do_inactive(),
            ReplayState::Closed => Ok(()),
        }
    }

    /// Runs validation and setup exactly once (steps 1-4), then on every
    /// tick checks whether the publication has connected yet (steps 5-6).
    fn do_init(&mut self) -> ArchiveResult<()> {
        if self.cursor.is_none() {
            if let Err(e) = self.setup() {
                self.fail(&e.to_string());
                return Ok(());
            }
        }

        let publication = self.publication.as_ref().expect("publication set by setup");
        if publication.is_connected() {
            self.control.send_ok(self.request.correlation_id);
            self.state = ReplayState::Replay;
        } else if self.clock.now_ms() - self.created_at_ms > self.config.linger_length_ms {
            self.state = ReplayState::Inactive;
        }
        Ok(())
    }

    fn setup(&mut self) -> ArchiveResult<()> {
        let descriptor = read_descriptor_for_recording(&self.archive_dir, self.request.recording_id)?;

        let initial_position = descriptor.initial_position.max(0) as u64;
        if self.request.from_position < initial_position {
            return Err(ArchiveError::BeforeStart {
                requested: self.request.from_position,
                initial_position,
            });
        }

        let last_position = descriptor.last_position.max(0) as u64;
        let replay_length = self.request.replay_length.max(0) as u64;
        let end = self.request.from_position + replay_length;
        if end > last_position {
            return Err(ArchiveError::PastEnd {
                from: self.request.from_position,
                length: replay_length,
                last_position,
            });
        }

        let cursor = Cursor::open(
            self.request.recording_id,
            &self.archive_dir,
            self.request.from_position,
            self.request.replay_length,
        )?;

        let params = PublicationParams {
            from_position: self.request.from_position,
            mtu_length: descriptor.mtu_length,
            initial_term_id: descriptor.initial_term_id,
            term_buffer_length: descriptor.term_buffer_length,
        };
        let factory = self.publication_factory.take().expect("setup runs exactly once");
        let publication = factory(params)?;

        self.cursor = Some(cursor);
        self.publication = Some(publication);
        Ok(())
    }

    fn do_replay(&mut self) -> ArchiveResult<()> {
        // Cursor is moved out for the duration of the poll: `controlled_poll`
        // needs `&mut dyn FragmentConsumer` and `self` is that consumer, so
        // both can't be borrowed from `self` at once.
        let mut cursor = self.cursor.take().expect("cursor present in Replay state");
        let result = cursor.controlled_poll(self, self.config.send_batch_size);
        self.cursor = Some(cursor);

        match result {
            Ok(_) => {}
            Err(e) => {
                self.fail(&e.to_string());
                return Ok(());
            }
        }

        if self.cursor.as_ref().expect("cursor restored above").is_done() {
            self.linger_since_ms = Some(self.clock.now_ms());
            self.state = ReplayState::Linger;
        }
        Ok(())
    }

    fn do_linger(&mut self) -> ArchiveResult<()> {
        let since = self.linger_since_ms.expect("linger_since_ms set entering Linger");
        if self.clock.now_ms() - since > self.config.linger_length_ms {
            self.state = ReplayState::Inactive;
        }
        Ok(())
    }

    fn do_inactive(&mut self) -> ArchiveResult<()> {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
        self.publication = None;
        self.state = ReplayState::Closed;
        Ok(())
    }

    fn fail(&mut self, message: &str) {
        log::warn!("replay {} failed: {message}", self.request.recording_id);
        if self.control.is_connected() {
            self.control.send_error(self.request.correlation_id, message);
        }
        self.state = ReplayState::Inactive;
    }
}

impl FragmentConsumer for ReplaySession {
    fn on_fragment(&mut self, fragment: Fragment<'_>) -> ArchiveResult<bool> {
        let recording_id = self.request.recording_id;
        let publication = self.publication.as_mut().expect("publication present during Replay");

        if publication.is_closed() || !publication.is_connected() {
            return Err(ArchiveError::ReplayPeerGone(recording_id));
        }

        let payload = fragment.buffer[fragment.data_offset..fragment.data_offset + fragment.data_length].to_vec();
        let length = payload.len() as i32;
        let flags = fragment.flags;
        let reserved_value = fragment.reserved_value;
        let frame_type = fragment.frame_type;

        let status = publication.try_claim(length, &mut |buf: &mut [u8]| {
            buf.copy_from_slice(&payload);
            FrameMeta {
                flags,
                reserved_value,
                frame_type,
            }
        })?;

        match status {
            ClaimStatus::Reserved(_) => Ok(true),
            ClaimStatus::BackPressured => Ok(false),
            ClaimStatus::NotConnected | ClaimStatus::Closed => Err(ArchiveError::ReplayPeerGone(recording_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RecorderConfig;
    use crate::frame::encode_frame;
    use crate::recorder::Recorder;
    use crate::transport::StreamIdentity;
    use std::cell::RefCell;
    use std::rc::Rc;
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

    struct NullControl {
        connected: bool,
        last_error: Option<String>,
    }

    impl ControlResponder for NullControl {
        fn send_ok(&mut self, _correlation_id: i64) {}
        fn send_error(&mut self, _correlation_id: i64, message: &str) {
            self.last_error = Some(message.to_string());
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    struct FakePublication {
        connected: bool,
        received: Rc<RefCell<Vec<(Vec<u8>, u8, i64)>>>,
    }

    impl OutboundPublication for FakePublication {
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn is_closed(&self) -> bool {
            false
        }
        fn try_claim(
            &mut self,
            length: i32,
            write: &mut dyn FnMut(&mut [u8]) -> FrameMeta,
        ) -> ArchiveResult<ClaimStatus> {
            let mut buf = vec![0u8; length as usize];
            let meta = write(&mut buf);
            self.received.borrow_mut().push((buf, meta.flags, meta.reserved_value));
            Ok(ClaimStatus::Reserved(0))
        }
    }

    fn record_one_fragment(dir: &std::path::Path) -> (u64, u64, u64) {
        // Starts mid-term so `from_position < initial_position` is a real,
        // constructible case for the BeforeStart test below.
        let config = RecorderConfig::new(dir, 4096, 16384);
        let clock = Arc::new(ManualClock::new(1_000));
        let mut rec = Recorder::new(1, config, identity(), 0, clock).unwrap();
        let frame = encode_frame(0, 128, 99, 0, 0b1, 42, b"payload");
        rec.on_fragment(&frame, 128, 0).unwrap();
        rec.stop().unwrap();
        let initial = rec.initial_position().unwrap();
        let last = rec.last_position();
        rec.close();
        (1, initial, last)
    }

    #[test]
    fn replays_to_a_connected_publication_and_lingers_then_closes() {
        let dir = tempdir().unwrap();
        let (recording_id, initial, last) = record_one_fragment(dir.path());

        let received = Rc::new(RefCell::new(Vec::new()));
        let received_for_factory = received.clone();
        let factory: PublicationFactory = Box::new(move |_params| {
            Ok(Box::new(FakePublication {
                connected: true,
                received: received_for_factory,
            }) as Box<dyn OutboundPublication>)
        });

        let request = ReplayRequest {
            recording_id,
            from_position: initial,
            replay_length: (last - initial) as i64,
            replay_channel: "replay-channel".to_string(),
            replay_stream_id: 20,
            correlation_id: 7,
        };

        let clock = Arc::new(ManualClock::new(2_000));
        let mut session = ReplaySession::new(
            request,
            dir.path(),
            factory,
            Box::new(NullControl { connected: true, last_error: None }),
            clock.clone(),
            ReplayConfig::default(),
        );

        session.do_work().unwrap();
        assert_eq!(session.state(), ReplayState::Replay);

        session.do_work().unwrap();
        assert_eq!(session.state(), ReplayState::Linger);
        assert_eq!(received.borrow().len(), 1);
        assert_eq!(received.borrow()[0].0, b"payload".to_vec());
        assert_eq!(received.borrow()[0].1, 0b1);
        assert_eq!(received.borrow()[0].2, 42);

        clock.advance_ms(2_000);
        session.do_work().unwrap();
        assert_eq!(session.state(), ReplayState::Inactive);

        session.do_work().unwrap();
        assert_eq!(session.state(), ReplayState::Closed);
    }

    #[test]
    fn before_start_fails_and_sends_control_error() {
        let dir = tempdir().unwrap();
        let (recording_id, initial, _last) = record_one_fragment(dir.path());

        let factory: PublicationFactory = Box::new(|_params| {
            panic!("publication should never be built for a rejected range");
        });

        let request = ReplayRequest {
            recording_id,
            from_position: initial.saturating_sub(1),
            replay_length: 1,
            replay_channel: "replay-channel".to_string(),
            replay_stream_id: 20,
            correlation_id: 1,
        };

        let clock = Arc::new(ManualClock::new(0));
        let mut session = ReplaySession::new(
            request,
            dir.path(),
            factory,
            Box::new(NullControl { connected: true, last_error: None }),
            clock,
            ReplayConfig::default(),
        );

        session.do_work().unwrap();
        assert_eq!(session.state(), ReplayState::Inactive);
    }

    #[test]
    fn never_connecting_publication_lingers_out_without_delivering() {
        let dir = tempdir().unwrap();
        let (recording_id, initial, last) = record_one_fragment(dir.path());

        let factory: PublicationFactory = Box::new(|_params| {
            Ok(Box::new(FakePublication {
                connected: false,
                received: Rc::new(RefCell::new(Vec::new())),
            }) as Box<dyn OutboundPublication>)
        });

        let request = ReplayRequest {
            recording_id,
            from_position: initial,
            replay_length: (last - initial) as i64,
            replay_channel: "replay-channel".to_string(),
            replay_stream_id: 20,
            correlation_id: 3,
        };

        let clock = Arc::new(ManualClock::new(0));
        let mut session = ReplaySession::new(
            request,
            dir.path(),
            factory,
            Box::new(NullControl { connected: true, last_error: None }),
            clock.clone(),
            ReplayConfig::default(),
        );

        session.do_work().unwrap();
        assert_eq!(session.state(), ReplayState::Init);

        clock.advance_ms(ReplayConfig::default().linger_length_ms + 1);
        session.do_work().unwrap();
        assert_eq!(session.state(), ReplayState::Inactive);
    }
}
