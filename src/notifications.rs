//! Fire-and-forget lifecycle notifications (§6). The archive never waits on
//! these; a real deployment wires them to the dispatcher's control channel,
//! tests and single-process embeddings can just log or collect them.

use crate::transport::StreamIdentity;

pub trait Notifications: Send {
    fn recording_started(&mut self, recording_id: u64, identity: &StreamIdentity);
    fn recording_progress(&mut self, recording_id: u64, initial_position: u64, last_position: u64);
    fn recording_stopped(&mut self, recording_id: u64);
}

/// Emits each notification as a log line at `info` level and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifications;

impl Notifications for LoggingNotifications {
    fn recording_started(&mut self, recording_id: u64, identity: &StreamIdentity) {
        log::info!(
            "recording {recording_id} started for channel '{}' stream {}",
            identity.channel, identity.stream_id
        );
    }

    fn recording_progress(&mut self, recording_id: u64, initial_position: u64, last_position: u64) {
        log::debug!(
            "recording {recording_id} progress: [{initial_position}, {last_position})"
        );
    }

    fn recording_stopped(&mut self, recording_id: u64) {
        log::info!("recording {recording_id} stopped");
    }
}
