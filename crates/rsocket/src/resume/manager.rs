use tracing::{trace, warn};

use crate::frame::{Envelope, Frame};
use crate::resume::replay_buffer::{ReplayBuffer, ReplayError};
use crate::session::ReplayConfig;

/// What to do with an inbound envelope, judged by its position.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Admission {
    Accept,
    /// Already received, typically replayed by the peer a second time.
    Duplicate,
    /// Positions were skipped; the frame cannot be applied in order.
    Gap { expected: u64 },
}

/// Sent and received positions of one session, plus the replay buffer when it is resumable.
///
/// Positions count resumable frames: the n-th resumable frame sent has position n. Both counters
/// start at zero and survive transport swaps.
pub(crate) struct ResumeManager {
    sent: u64,
    received: u64,
    buffer: Option<ReplayBuffer>,
}

impl ResumeManager {
    pub(crate) fn new() -> Self {
        Self { sent: 0, received: 0, buffer: None }
    }

    /// Starts buffering sent frames for replay.
    pub(crate) fn enable(&mut self, config: ReplayConfig) {
        if self.buffer.is_none() {
            self.buffer = Some(ReplayBuffer::new(config));
        }
    }

    /// Buffers frames that were stamped before resumption was enabled.
    pub(crate) fn backfill<'a>(&mut self, envelopes: impl Iterator<Item = &'a Envelope>) {
        if let Some(buffer) = &mut self.buffer {
            for envelope in envelopes {
                if let Some(position) = envelope.position {
                    buffer.push(position, envelope.frame.clone());
                }
            }
        }
    }

    pub(crate) fn is_resumable(&self) -> bool {
        self.buffer.is_some()
    }

    pub(crate) fn sent_position(&self) -> u64 {
        self.sent
    }

    pub(crate) fn received_position(&self) -> u64 {
        self.received
    }

    pub(crate) fn buffered(&self) -> usize {
        self.buffer.as_ref().map_or(0, ReplayBuffer::len)
    }

    /// Lowest sent position this side can still replay.
    pub(crate) fn first_available_position(&self) -> u64 {
        self.buffer.as_ref().map_or(self.sent + 1, |buffer| buffer.first_available(self.sent))
    }

    /// Assigns the next sent position to a resumable frame and buffers it.
    pub(crate) fn stamp(&mut self, frame: Frame) -> Envelope {
        if !frame.is_resumable() {
            return Envelope::unsequenced(frame);
        }
        self.sent += 1;
        if let Some(buffer) = &mut self.buffer {
            buffer.push(self.sent, frame.clone());
        }
        Envelope::sequenced(self.sent, frame)
    }

    /// Checks an inbound envelope against the received position and counts it when accepted.
    pub(crate) fn admit(&mut self, envelope: &Envelope) -> Admission {
        if !envelope.frame.is_resumable() {
            return Admission::Accept;
        }
        let expected = self.received + 1;
        match envelope.position {
            Some(position) if position <= self.received => {
                warn!(position, received = self.received, "dropping duplicate frame");
                Admission::Duplicate
            }
            Some(position) if position > expected => {
                warn!(position, expected, "dropping out of order frame");
                Admission::Gap { expected }
            }
            _ => {
                self.received = expected;
                trace!(position = expected, "accepted frame");
                Admission::Accept
            }
        }
    }

    /// The peer confirmed receiving everything through `position`.
    pub(crate) fn acknowledge(&mut self, position: u64) {
        if let Some(buffer) = &mut self.buffer {
            buffer.release_through(position.min(self.sent));
        }
    }

    /// Frames to send again after the peer reported `peer_received` as its last received position.
    pub(crate) fn replay_after(&self, peer_received: u64) -> Result<Vec<Envelope>, ReplayError> {
        match &self.buffer {
            Some(buffer) => buffer.replay_after(peer_received, self.sent),
            None => Err(ReplayError::NotResumable),
        }
    }

    /// Whether the peer can still replay everything this side is missing.
    pub(crate) fn can_receive_from(&self, peer_first_available: u64) -> bool {
        peer_first_available <= self.received + 1
    }
}
