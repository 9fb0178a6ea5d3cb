use std::collections::VecDeque;

use thiserror::Error;
use tracing::warn;

use crate::frame::{Envelope, Frame};
use crate::session::ReplayConfig;

/// Why the frames a peer asked for cannot be replayed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("frames after position {requested} are no longer buffered, first available is {first_available}")]
    Evicted { requested: u64, first_available: u64 },

    #[error("peer claims position {claimed} but only {sent} frames were sent")]
    AheadOfSent { claimed: u64, sent: u64 },

    #[error("session is not resumable")]
    NotResumable,
}

struct Entry {
    position: u64,
    size: usize,
    frame: Frame,
}

/// Sent resumable frames the peer has not acknowledged yet, oldest first.
pub(crate) struct ReplayBuffer {
    config: ReplayConfig,
    entries: VecDeque<Entry>,
    bytes: usize,
    evicted: u64,
}

impl ReplayBuffer {
    pub(crate) fn new(config: ReplayConfig) -> Self {
        Self { config, entries: VecDeque::new(), bytes: 0, evicted: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    /// Frames dropped because the buffer was full rather than acknowledged.
    pub(crate) fn evicted(&self) -> u64 {
        self.evicted
    }

    pub(crate) fn push(&mut self, position: u64, frame: Frame) {
        let size = frame.size_hint();
        self.bytes += size;
        self.entries.push_back(Entry { position, size, frame });

        while self.entries.len() > self.config.max_frames || (self.bytes > self.config.max_bytes && !self.entries.is_empty()) {
            let Some(oldest) = self.entries.pop_front() else { break };
            self.bytes -= oldest.size;
            self.evicted += 1;
            warn!(position = oldest.position, "replay buffer full, evicting unacknowledged frame");
        }
    }

    /// Drops every frame at or below `position`, which the peer confirmed it received.
    pub(crate) fn release_through(&mut self, position: u64) {
        while let Some(front) = self.entries.front() {
            if front.position > position {
                break;
            }
            self.bytes -= front.size;
            self.entries.pop_front();
        }
    }

    /// Lowest position still available for replay, given that `sent` frames were sent in total.
    pub(crate) fn first_available(&self, sent: u64) -> u64 {
        self.entries.front().map_or(sent + 1, |entry| entry.position)
    }

    /// Copies of every buffered frame after `position`, in order.
    pub(crate) fn replay_after(&self, position: u64, sent: u64) -> Result<Vec<Envelope>, ReplayError> {
        if position > sent {
            return Err(ReplayError::AheadOfSent { claimed: position, sent });
        }
        let first_available = self.first_available(sent);
        if position + 1 < first_available {
            return Err(ReplayError::Evicted { requested: position, first_available });
        }
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.position > position)
            .map(|entry| Envelope::sequenced(entry.position, entry.frame.clone()))
            .collect())
    }
}
