use std::time::Duration;

use crate::codec::DEFAULT_MAX_FRAME_LENGTH;
use crate::frame::StreamId;

/// Bounds of the replay buffer kept for resumable sessions.
///
/// When either bound is exceeded the oldest frames are evicted. A peer that later resumes
/// needing an evicted frame is refused, and the session's streams fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayConfig {
    pub max_frames: usize,
    pub max_bytes: usize,
}

impl ReplayConfig {
    pub const DEFAULT_MAX_FRAMES: usize = 1024;
    pub const DEFAULT_MAX_BYTES: usize = 4 * 1024 * 1024;
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { max_frames: Self::DEFAULT_MAX_FRAMES, max_bytes: Self::DEFAULT_MAX_BYTES }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    replay: ReplayConfig,
    max_held_frames: usize,
    stream_id_limit: u32,
    resume_window: Duration,
    max_frame_length: usize,
}

impl SessionConfig {
    pub const DEFAULT_RESUME_WINDOW: Duration = Duration::from_secs(120);

    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder { config: SessionConfig::default() }
    }

    pub fn replay(&self) -> ReplayConfig {
        self.replay
    }

    /// Frames produced while no transport is attached that are kept for the next connect.
    pub fn max_held_frames(&self) -> usize {
        self.max_held_frames
    }

    /// Highest stream id this side allocates before wrapping around.
    pub fn stream_id_limit(&self) -> u32 {
        self.stream_id_limit
    }

    /// How long a disconnected server session waits for the client to resume before closing.
    pub fn resume_window(&self) -> Duration {
        self.resume_window
    }

    /// Largest frame the transport carries. Payloads that would not fit fail their stream
    /// instead of reaching the codec.
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            replay: ReplayConfig::default(),
            max_held_frames: ReplayConfig::DEFAULT_MAX_FRAMES,
            stream_id_limit: StreamId::MAX,
            resume_window: Self::DEFAULT_RESUME_WINDOW,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

#[derive(Debug)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn replay(mut self, replay: ReplayConfig) -> Self {
        self.config.replay = replay;
        self
    }

    pub fn max_held_frames(mut self, max_held_frames: usize) -> Self {
        self.config.max_held_frames = max_held_frames.max(1);
        self
    }

    pub fn stream_id_limit(mut self, limit: u32) -> Self {
        self.config.stream_id_limit = limit.clamp(2, StreamId::MAX);
        self
    }

    pub fn resume_window(mut self, window: Duration) -> Self {
        self.config.resume_window = window;
        self
    }

    pub fn max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.config.max_frame_length = max_frame_length.min(DEFAULT_MAX_FRAME_LENGTH);
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}
