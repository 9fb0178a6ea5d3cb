use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use thiserror::Error;

use crate::frame::ErrorCode;
use crate::resume::ReplayError;

/// Why a resume attempt did not succeed while the transport itself was fine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResumeRejection {
    #[error("peer rejected resume ({code}): {message}")]
    Peer { code: ErrorCode, message: String },

    #[error("cannot replay: {0}")]
    Replay(#[from] ReplayError),

    #[error("peer can only replay from position {first_available}, received through {received}")]
    Unreachable { first_available: u64, received: u64 },

    #[error("session is not resumable")]
    NotResumable,

    #[error("session closed")]
    SessionClosed,
}

/// Result of one resume attempt. Exactly one is delivered per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed,
    Rejected(ResumeRejection),
    /// The new transport failed before the handshake finished.
    ConnectionError(String),
}

impl ResumeOutcome {
    pub fn is_resumed(&self) -> bool {
        matches!(self, ResumeOutcome::Resumed)
    }
}

/// Resolves to the [`ResumeOutcome`] of a resume attempt started with
/// [`Session::resume`](crate::session::Session::resume).
#[derive(Debug)]
pub struct ResumeHandle {
    receiver: oneshot::Receiver<ResumeOutcome>,
}

impl ResumeHandle {
    pub(crate) fn new(receiver: oneshot::Receiver<ResumeOutcome>) -> Self {
        Self { receiver }
    }
}

impl Future for ResumeHandle {
    type Output = ResumeOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(ResumeOutcome::Rejected(ResumeRejection::SessionClosed)))
    }
}
