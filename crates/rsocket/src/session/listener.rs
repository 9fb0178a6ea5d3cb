use std::time::Duration;

use bytes::Bytes;
use tracing::{info, trace};

use crate::frame::FrameType;
use crate::resume::ResumeToken;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Server,
}

/// The last LEASE the peer granted. Recorded, not enforced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub ttl: Duration,
    pub requests: u32,
    pub metadata: Option<Bytes>,
}

/// A snapshot of a session, passed to [`SessionListener`] callbacks.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub role: SessionRole,
    pub token: Option<ResumeToken>,
    pub sent_position: u64,
    pub received_position: u64,
    pub live_streams: usize,
    /// Sent frames kept for replay, not yet acknowledged by the peer.
    pub buffered_frames: usize,
    /// Frames received over every transport this session had.
    pub frames_read: u64,
    pub frames_written: u64,
    pub lease: Option<Lease>,
}

/// Lifecycle notifications of a session.
///
/// `on_connected` fires when a transport is attached and the handshake (SETUP or RESUME)
/// completed, `on_disconnected` when a resumable session loses its transport, `on_closed` once
/// when the session ends for good. `on_frame_read` and `on_frame_written` fire for every frame
/// crossing the transport and are meant for counters.
#[cfg_attr(test, mockall::automock)]
pub trait SessionListener: Send {
    fn on_connected(&mut self, info: &SessionInfo) {
        info!(role = ?info.role, "session connected");
    }

    fn on_disconnected(&mut self, info: &SessionInfo) {
        info!(role = ?info.role, sent = info.sent_position, received = info.received_position, "session disconnected");
    }

    fn on_closed(&mut self, info: &SessionInfo, reason: &str) {
        info!(role = ?info.role, reason, "session closed");
    }

    fn on_frame_read(&mut self, frame_type: FrameType) {
        trace!(?frame_type, "frame read");
    }

    fn on_frame_written(&mut self, frame_type: FrameType) {
        trace!(?frame_type, "frame written");
    }
}

/// Listener that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl SessionListener for LoggingListener {}
