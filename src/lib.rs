//! # archive_core
//!
//! Recording and replay engine for the archival plane of a low-latency
//! pub/sub transport: segmented on-disk recordings, a recorder state
//! machine, a fragment cursor and a replay state machine.
//!
//! This crate owns the data path only: it writes and reads recording
//! segments and their descriptors, and replays them back as framed
//! fragments. The dispatcher that fronts these sessions for remote clients,
//! the media driver's term buffers, and the transport's wire protocol are
//! all out of scope; this crate depends on them only through the small
//! collaborator traits in [`transport`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use archive_core::{Clock, RecorderConfig, Recorder, SystemClock, StreamIdentity};
//!
//! let config = RecorderConfig::new("/var/archive", 4096 * 1024, 4096 * 1024 * 16);
//! let identity = StreamIdentity {
//!     source: "127.0.0.1:40001".to_string(),
//!     session_id: 1,
//!     channel: "aeron:udp?endpoint=localhost:40001".to_string(),
//!     stream_id: 10,
//!     mtu_length: 1408,
//! };
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let recorder = Recorder::new(1, config, identity, 0, clock)?;
//! # Ok::<(), archive_core::ArchiveError>(())
//! ```

pub mod catalog;
pub mod clock;
pub mod config;
pub mod cursor;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod layout;
pub mod notifications;
pub mod position;
pub mod recorder;
pub mod recording_session;
pub mod replay_session;
pub mod transport;

pub use catalog::{Catalog, InMemoryCatalog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RecorderConfig, ReplayConfig, DEFAULT_LINGER_LENGTH_MS, DEFAULT_REPLAY_SEND_BATCH_SIZE};
pub use cursor::{Cursor, Fragment, FragmentConsumer};
pub use descriptor::{read_descriptor, read_descriptor_for_recording, RecordingDescriptor};
pub use error::{ArchiveError, ArchiveResult};
pub use frame::{decode_frame_header, encode_frame, FrameHeader, FRAME_ALIGNMENT};
pub use notifications::{LoggingNotifications, Notifications};
pub use position::Geometry;
pub use recorder::{Recorder, RecordingStats};
pub use recording_session::{RecordingSession, RecordingState};
pub use replay_session::{
    ControlResponder, PublicationFactory, PublicationParams, ReplayRequest, ReplaySession, ReplayState,
};
pub use transport::{Block, BlockHandler, ClaimStatus, FrameMeta, Image, OutboundPublication, StreamIdentity};
