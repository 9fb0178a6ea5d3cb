//! Frame decoder
//!
//! Splits the inbound byte stream on the `u24` length prefix and decodes each frame into an
//! [`Envelope`]. Payload bytes are never copied: metadata and data are slices of the read
//! buffer.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::wire;
use crate::codec::{DEFAULT_MAX_FRAME_LENGTH, LENGTH_FIELD_LEN};
use crate::ensure;
use crate::frame::{Envelope, FRAME_HEADER_LEN, Frame, FrameType, SetupPayload, StreamId, flags};
use crate::protocol::ProtocolError;
use crate::resume::ResumeToken;

/// Decodes length-prefixed frames.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_length: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a decoder rejecting frames longer than `max_frame_length` bytes.
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self { max_frame_length: max_frame_length.min(DEFAULT_MAX_FRAME_LENGTH) }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self { max_frame_length: DEFAULT_MAX_FRAME_LENGTH }
    }
}

impl Decoder for FrameDecoder {
    type Item = Envelope;
    type Error = ProtocolError;

    /// # Returns
    ///
    /// - `Ok(Some(envelope))`: one complete frame was consumed from `src`
    /// - `Ok(None)`: need more bytes
    /// - `Err(_)`: the frame is oversized or malformed
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_LEN {
            return Ok(None);
        }

        let frame_len = (usize::from(src[0]) << 16) | (usize::from(src[1]) << 8) | usize::from(src[2]);
        ensure!(frame_len <= self.max_frame_length, ProtocolError::too_large_frame(frame_len, self.max_frame_length));

        let total_len = LENGTH_FIELD_LEN + frame_len;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_LEN);
        let mut frame_bytes = src.split_to(frame_len).freeze();
        let envelope = decode_envelope(&mut frame_bytes)?;
        trace!(stream_id = %envelope.frame.stream_id(), frame_type = ?envelope.frame.frame_type(), "decoded frame");
        Ok(Some(envelope))
    }
}

fn decode_envelope(buf: &mut Bytes) -> Result<Envelope, ProtocolError> {
    wire::need(buf, FRAME_HEADER_LEN, "frame header")?;
    let stream_id = StreamId::new(buf.get_u32() & StreamId::MAX);
    let frame_type = FrameType::try_from(buf.get_u8())?;
    let frame_flags = buf.get_u8();
    let position = match buf.get_u64() {
        0 => None,
        position => Some(position),
    };

    let connection_scoped = matches!(
        frame_type,
        FrameType::Setup | FrameType::Lease | FrameType::Keepalive | FrameType::MetadataPush | FrameType::Resume | FrameType::ResumeOk
    );
    ensure!(
        frame_type == FrameType::Error || connection_scoped == stream_id.is_connection(),
        ProtocolError::invalid_frame(format!("{frame_type:?} frame can't be carried on stream {stream_id}"))
    );

    let frame = decode_frame(frame_type, stream_id, frame_flags, buf)?;
    Ok(Envelope { position, frame })
}

fn decode_frame(frame_type: FrameType, stream_id: StreamId, frame_flags: u8, buf: &mut Bytes) -> Result<Frame, ProtocolError> {
    let frame = match frame_type {
        FrameType::Setup => Frame::Setup(decode_setup(frame_flags, buf)?),
        FrameType::Lease => {
            let ttl_ms = wire::get_u32(buf, "lease ttl")?;
            let requests = wire::get_u32(buf, "lease requests")?;
            let metadata = (frame_flags & flags::METADATA != 0).then(|| buf.split_to(buf.remaining()));
            Frame::Lease { ttl_ms, requests, metadata }
        }
        FrameType::Keepalive => {
            let last_received_position = wire::get_u64(buf, "keepalive position")?;
            Frame::Keepalive {
                respond: frame_flags & flags::RESPOND != 0,
                last_received_position,
                data: buf.split_to(buf.remaining()),
            }
        }
        FrameType::RequestResponse => Frame::RequestResponse { stream_id, payload: wire::get_payload(buf, frame_flags)? },
        FrameType::RequestFnf => Frame::RequestFnf { stream_id, payload: wire::get_payload(buf, frame_flags)? },
        FrameType::RequestStream => {
            let initial_n = wire::get_u32(buf, "initial request n")?;
            Frame::RequestStream { stream_id, initial_n, payload: wire::get_payload(buf, frame_flags)? }
        }
        FrameType::RequestSubscription => {
            let initial_n = wire::get_u32(buf, "initial request n")?;
            Frame::RequestSubscription { stream_id, initial_n, payload: wire::get_payload(buf, frame_flags)? }
        }
        FrameType::RequestChannel => {
            let initial_n = wire::get_u32(buf, "initial request n")?;
            Frame::RequestChannel {
                stream_id,
                initial_n,
                payload: wire::get_payload(buf, frame_flags)?,
                complete: frame_flags & flags::COMPLETE != 0,
            }
        }
        FrameType::RequestN => Frame::RequestN { stream_id, n: wire::get_u32(buf, "request n")? },
        FrameType::Cancel => Frame::Cancel { stream_id },
        FrameType::Payload => {
            let complete = frame_flags & flags::COMPLETE != 0;
            let next = frame_flags & flags::NEXT != 0;
            ensure!(next || complete, ProtocolError::invalid_frame("payload frame without NEXT or COMPLETE"));
            let next = if next { Some(wire::get_payload(buf, frame_flags)?) } else { None };
            Frame::Payload { stream_id, next, complete }
        }
        FrameType::Error => {
            let code = wire::get_u32(buf, "error code")?.into();
            let message = wire::into_string(buf.split_to(buf.remaining()), "error message")?;
            Frame::Error { stream_id, code, message }
        }
        FrameType::MetadataPush => Frame::MetadataPush { metadata: buf.split_to(buf.remaining()) },
        FrameType::Resume => {
            let token = decode_token(buf)?;
            let last_received_server_position = wire::get_u64(buf, "last received server position")?;
            let first_available_client_position = wire::get_u64(buf, "first available client position")?;
            Frame::Resume { token, last_received_server_position, first_available_client_position }
        }
        FrameType::ResumeOk => {
            Frame::ResumeOk { last_received_client_position: wire::get_u64(buf, "last received client position")? }
        }
    };

    Ok(frame)
}

fn decode_setup(frame_flags: u8, buf: &mut Bytes) -> Result<SetupPayload, ProtocolError> {
    let major = wire::get_u16(buf, "setup major version")?;
    let minor = wire::get_u16(buf, "setup minor version")?;
    let keepalive_interval = Duration::from_millis(u64::from(wire::get_u32(buf, "keepalive interval")?));
    let max_lifetime = Duration::from_millis(u64::from(wire::get_u32(buf, "max lifetime")?));

    let mut builder = SetupPayload::builder()
        .version(major, minor)
        .keepalive(keepalive_interval, max_lifetime)
        .lease(frame_flags & flags::LEASE != 0);

    if frame_flags & flags::RESUME_ENABLE != 0 {
        builder = builder.resume_token(decode_token(buf)?);
    }

    let metadata_mime_type = wire::get_short_str(buf, "metadata mime type")?;
    let data_mime_type = wire::get_short_str(buf, "data mime type")?;
    let payload = wire::get_payload(buf, frame_flags)?;

    Ok(builder.mime_types(metadata_mime_type, data_mime_type).payload(payload).build())
}

fn decode_token(buf: &mut Bytes) -> Result<ResumeToken, ProtocolError> {
    let len = usize::from(wire::get_u16(buf, "resume token length")?);
    Ok(ResumeToken::from_bytes(wire::take(buf, len, "resume token")?))
}
