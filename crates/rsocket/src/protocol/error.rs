use std::error::Error;
use std::io;

use thiserror::Error;

use crate::frame::ErrorCode;

/// Error type returned by application request handlers.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Failures of the frame codec.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("frame size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeFrame { current_size: usize, max_size: usize },

    #[error("truncated frame: {reason}")]
    Truncated { reason: String },

    #[error("unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ProtocolError {
    pub fn too_large_frame(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeFrame { current_size, max_size }
    }

    pub fn truncated<S: ToString>(str: S) -> Self {
        Self::Truncated { reason: str.to_string() }
    }

    pub fn invalid_frame<S: ToString>(str: S) -> Self {
        Self::InvalidFrame { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Terminal error observed by a single stream. Never fatal to the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("application error: {message}")]
    Application { message: String },

    #[error("request rejected: {message}")]
    Rejected { message: String },

    #[error("stream canceled: {message}")]
    Canceled { message: String },

    #[error("invalid stream: {message}")]
    Invalid { message: String },

    #[error("invalid credit request of {requested}, credit must be positive")]
    InvalidCredit { requested: u32 },

    #[error("item emitted without outstanding credit")]
    CreditExceeded,

    #[error("item emitted before the subscription was established")]
    NotSubscribed,

    #[error("session closed: {reason}")]
    SessionClosed { reason: String },

    #[error("resume failed: {reason}")]
    ResumeFailed { reason: String },

    #[error("no stream identifier available")]
    IdsExhausted,
}

impl StreamError {
    pub fn application<S: ToString>(str: S) -> Self {
        Self::Application { message: str.to_string() }
    }

    pub fn rejected<S: ToString>(str: S) -> Self {
        Self::Rejected { message: str.to_string() }
    }

    pub fn invalid<S: ToString>(str: S) -> Self {
        Self::Invalid { message: str.to_string() }
    }

    pub fn session_closed<S: ToString>(str: S) -> Self {
        Self::SessionClosed { reason: str.to_string() }
    }

    pub fn resume_failed<S: ToString>(str: S) -> Self {
        Self::ResumeFailed { reason: str.to_string() }
    }

    /// Rebuilds the error carried by an inbound ERROR frame.
    pub fn from_frame(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::Rejected => Self::Rejected { message },
            ErrorCode::Canceled => Self::Canceled { message },
            ErrorCode::Invalid => Self::Invalid { message },
            _ => Self::Application { message },
        }
    }

    /// Text carried in the ERROR frame that reports this error to the peer.
    pub fn message(&self) -> String {
        match self {
            StreamError::Application { message }
            | StreamError::Rejected { message }
            | StreamError::Canceled { message }
            | StreamError::Invalid { message } => message.clone(),
            other => other.to_string(),
        }
    }

    /// The code used when this error is reported to the peer.
    pub fn code(&self) -> ErrorCode {
        match self {
            StreamError::Rejected { .. } => ErrorCode::Rejected,
            StreamError::Canceled { .. } => ErrorCode::Canceled,
            StreamError::Invalid { .. }
            | StreamError::InvalidCredit { .. }
            | StreamError::CreditExceeded
            | StreamError::NotSubscribed => ErrorCode::Invalid,
            StreamError::Application { .. }
            | StreamError::SessionClosed { .. }
            | StreamError::ResumeFailed { .. }
            | StreamError::IdsExhausted => ErrorCode::ApplicationError,
        }
    }
}

/// Failures of session-level operations: setup, resume, closed sessions.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session closed")]
    Closed,

    #[error("invalid setup: {reason}")]
    InvalidSetup { reason: String },

    #[error("unsupported setup: {reason}")]
    UnsupportedSetup { reason: String },

    #[error("rejected setup: {reason}")]
    RejectedSetup { reason: String },

    #[error("session already connected")]
    AlreadyConnected,

    #[error("session is not resumable")]
    NotResumable,

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("protocol error: {source}")]
    Protocol {
        #[from]
        source: ProtocolError,
    },
}

impl SessionError {
    pub fn invalid_setup<S: ToString>(str: S) -> Self {
        Self::InvalidSetup { reason: str.to_string() }
    }

    pub fn unsupported_setup<S: ToString>(str: S) -> Self {
        Self::UnsupportedSetup { reason: str.to_string() }
    }

    pub fn rejected_setup<S: ToString>(str: S) -> Self {
        Self::RejectedSetup { reason: str.to_string() }
    }

    /// The connection-level code reported to the peer for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::InvalidSetup { .. } => ErrorCode::InvalidSetup,
            SessionError::UnsupportedSetup { .. } => ErrorCode::UnsupportedSetup,
            SessionError::RejectedSetup { .. } => ErrorCode::RejectedSetup,
            SessionError::NotResumable => ErrorCode::RejectedResume,
            SessionError::Closed => ErrorCode::ConnectionClose,
            SessionError::AlreadyConnected | SessionError::FrameTooLarge { .. } | SessionError::Protocol { .. } => {
                ErrorCode::ConnectionError
            }
        }
    }
}
