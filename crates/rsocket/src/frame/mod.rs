//! Protocol frames exchanged between two peers.
//!
//! A [`Frame`] is the decoded form of one protocol message. Frames that belong to a stream carry
//! its [`StreamId`]; connection-level frames (setup, keepalive, lease, metadata push, resume and
//! connection errors) live on stream `0`.
//!
//! The unit handed to and received from a transport is an [`Envelope`]: the frame plus the sent
//! position the resumption layer assigned to it, if the frame is resumable.

mod error_code;
mod frame_type;
mod payload;
mod setup;
mod stream_id;

pub use error_code::ErrorCode;
pub use frame_type::FrameType;
pub use frame_type::flags;
pub use payload::Payload;
pub use setup::{PROTOCOL_VERSION, SetupPayload, SetupPayloadBuilder, Version};
pub use stream_id::StreamId;

use bytes::Bytes;

use crate::resume::ResumeToken;

/// Fixed bytes every frame spends on its header: stream id, type, flags and position.
pub(crate) const FRAME_HEADER_LEN: usize = 4 + 1 + 1 + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Setup(SetupPayload),
    Lease { ttl_ms: u32, requests: u32, metadata: Option<Bytes> },
    Keepalive { respond: bool, last_received_position: u64, data: Bytes },
    RequestResponse { stream_id: StreamId, payload: Payload },
    RequestFnf { stream_id: StreamId, payload: Payload },
    RequestStream { stream_id: StreamId, initial_n: u32, payload: Payload },
    RequestSubscription { stream_id: StreamId, initial_n: u32, payload: Payload },
    RequestChannel { stream_id: StreamId, initial_n: u32, payload: Payload, complete: bool },
    RequestN { stream_id: StreamId, n: u32 },
    Cancel { stream_id: StreamId },
    /// An item (`next`), a completion, or both.
    Payload { stream_id: StreamId, next: Option<Payload>, complete: bool },
    Error { stream_id: StreamId, code: ErrorCode, message: String },
    MetadataPush { metadata: Bytes },
    Resume { token: ResumeToken, last_received_server_position: u64, first_available_client_position: u64 },
    ResumeOk { last_received_client_position: u64 },
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Setup(_) => FrameType::Setup,
            Frame::Lease { .. } => FrameType::Lease,
            Frame::Keepalive { .. } => FrameType::Keepalive,
            Frame::RequestResponse { .. } => FrameType::RequestResponse,
            Frame::RequestFnf { .. } => FrameType::RequestFnf,
            Frame::RequestStream { .. } => FrameType::RequestStream,
            Frame::RequestSubscription { .. } => FrameType::RequestSubscription,
            Frame::RequestChannel { .. } => FrameType::RequestChannel,
            Frame::RequestN { .. } => FrameType::RequestN,
            Frame::Cancel { .. } => FrameType::Cancel,
            Frame::Payload { .. } => FrameType::Payload,
            Frame::Error { .. } => FrameType::Error,
            Frame::MetadataPush { .. } => FrameType::MetadataPush,
            Frame::Resume { .. } => FrameType::Resume,
            Frame::ResumeOk { .. } => FrameType::ResumeOk,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::RequestResponse { stream_id, .. }
            | Frame::RequestFnf { stream_id, .. }
            | Frame::RequestStream { stream_id, .. }
            | Frame::RequestSubscription { stream_id, .. }
            | Frame::RequestChannel { stream_id, .. }
            | Frame::RequestN { stream_id, .. }
            | Frame::Cancel { stream_id }
            | Frame::Payload { stream_id, .. }
            | Frame::Error { stream_id, .. } => *stream_id,
            _ => StreamId::CONNECTION,
        }
    }

    /// Resumable frames are counted by the position counters and kept for replay.
    ///
    /// Everything scoped to a stream is resumable, as is METADATA_PUSH. Handshake frames,
    /// keepalives, leases and connection-level errors belong to a single transport attachment.
    pub fn is_resumable(&self) -> bool {
        match self {
            Frame::MetadataPush { .. } => true,
            Frame::Setup(_) | Frame::Lease { .. } | Frame::Keepalive { .. } | Frame::Resume { .. } | Frame::ResumeOk { .. } => {
                false
            }
            other => !other.stream_id().is_connection(),
        }
    }

    /// Approximate encoded size, used for replay buffer accounting.
    pub fn size_hint(&self) -> usize {
        let body = match self {
            Frame::Setup(setup) => {
                24 + setup.metadata_mime_type().len() + setup.data_mime_type().len() + setup.payload().len()
            }
            Frame::Lease { metadata, .. } => 8 + metadata.as_ref().map_or(0, Bytes::len),
            Frame::Keepalive { data, .. } => 8 + data.len(),
            Frame::RequestResponse { payload, .. } | Frame::RequestFnf { payload, .. } => 3 + payload.len(),
            Frame::RequestStream { payload, .. }
            | Frame::RequestSubscription { payload, .. }
            | Frame::RequestChannel { payload, .. } => 7 + payload.len(),
            Frame::RequestN { .. } => 4,
            Frame::Cancel { .. } => 0,
            Frame::Payload { next, .. } => 3 + next.as_ref().map_or(0, Payload::len),
            Frame::Error { message, .. } => 6 + message.len(),
            Frame::MetadataPush { metadata } => metadata.len(),
            Frame::Resume { token, .. } => 18 + token.len(),
            Frame::ResumeOk { .. } => 8,
        };
        FRAME_HEADER_LEN + body
    }

    pub(crate) fn error(stream_id: StreamId, code: ErrorCode, message: impl Into<String>) -> Self {
        Frame::Error { stream_id, code, message: message.into() }
    }
}

/// A frame together with the sent position assigned by the resumption layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub position: Option<u64>,
    pub frame: Frame,
}

impl Envelope {
    /// An envelope for a frame that does not take part in resumption.
    pub fn unsequenced(frame: Frame) -> Self {
        Self { position: None, frame }
    }

    pub fn sequenced(position: u64, frame: Frame) -> Self {
        Self { position: Some(position), frame }
    }
}

impl From<Frame> for Envelope {
    fn from(frame: Frame) -> Self {
        Self::unsequenced(frame)
    }
}
