use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::wire;
use crate::codec::{DEFAULT_MAX_FRAME_LENGTH, LENGTH_FIELD_LEN};
use crate::frame::{Envelope, Frame, SetupPayload, flags};
use crate::protocol::ProtocolError;
use crate::resume::ResumeToken;

/// Encodes envelopes as length-prefixed frames.
#[derive(Debug, Clone, Default)]
pub struct FrameEncoder;

impl FrameEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Encoder<Envelope> for FrameEncoder {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        dst.reserve(LENGTH_FIELD_LEN + item.frame.size_hint());

        // length is patched once the body is written
        dst.put_uint(0, LENGTH_FIELD_LEN);
        dst.put_u32(item.frame.stream_id().value());
        dst.put_u8(item.frame.frame_type().code());
        dst.put_u8(frame_flags(&item.frame));
        dst.put_u64(item.position.unwrap_or(0));

        if let Err(e) = encode_body(&item.frame, dst) {
            error!(cause = %e, frame_type = ?item.frame.frame_type(), "failed to encode frame");
            dst.truncate(start);
            return Err(e);
        }

        let frame_len = dst.len() - start - LENGTH_FIELD_LEN;
        if frame_len > DEFAULT_MAX_FRAME_LENGTH {
            dst.truncate(start);
            return Err(ProtocolError::too_large_frame(frame_len, DEFAULT_MAX_FRAME_LENGTH));
        }

        let len_bytes = (frame_len as u32).to_be_bytes();
        dst[start..start + LENGTH_FIELD_LEN].copy_from_slice(&len_bytes[1..]);
        Ok(())
    }
}

fn frame_flags(frame: &Frame) -> u8 {
    let metadata_flag = |present: bool| if present { flags::METADATA } else { 0 };

    match frame {
        Frame::Setup(setup) => {
            let mut bits = metadata_flag(setup.payload().metadata().is_some());
            if setup.is_resumable() {
                bits |= flags::RESUME_ENABLE;
            }
            if setup.honors_lease() {
                bits |= flags::LEASE;
            }
            bits
        }
        Frame::Lease { metadata, .. } => metadata_flag(metadata.is_some()),
        Frame::Keepalive { respond, .. } => {
            if *respond {
                flags::RESPOND
            } else {
                0
            }
        }
        Frame::RequestResponse { payload, .. }
        | Frame::RequestFnf { payload, .. }
        | Frame::RequestStream { payload, .. }
        | Frame::RequestSubscription { payload, .. } => metadata_flag(payload.metadata().is_some()),
        Frame::RequestChannel { payload, complete, .. } => {
            let bits = metadata_flag(payload.metadata().is_some());
            if *complete { bits | flags::COMPLETE } else { bits }
        }
        Frame::Payload { next, complete, .. } => {
            let mut bits = 0;
            if let Some(payload) = next {
                bits |= flags::NEXT | metadata_flag(payload.metadata().is_some());
            }
            if *complete {
                bits |= flags::COMPLETE;
            }
            bits
        }
        Frame::RequestN { .. }
        | Frame::Cancel { .. }
        | Frame::Error { .. }
        | Frame::MetadataPush { .. }
        | Frame::Resume { .. }
        | Frame::ResumeOk { .. } => 0,
    }
}

fn encode_body(frame: &Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    match frame {
        Frame::Setup(setup) => encode_setup(setup, dst)?,
        Frame::Lease { ttl_ms, requests, metadata } => {
            dst.put_u32(*ttl_ms);
            dst.put_u32(*requests);
            if let Some(metadata) = metadata {
                dst.put_slice(metadata);
            }
        }
        Frame::Keepalive { last_received_position, data, .. } => {
            dst.put_u64(*last_received_position);
            dst.put_slice(data);
        }
        Frame::RequestResponse { payload, .. } | Frame::RequestFnf { payload, .. } => wire::put_payload(dst, payload)?,
        Frame::RequestStream { initial_n, payload, .. }
        | Frame::RequestSubscription { initial_n, payload, .. }
        | Frame::RequestChannel { initial_n, payload, .. } => {
            dst.put_u32(*initial_n);
            wire::put_payload(dst, payload)?;
        }
        Frame::RequestN { n, .. } => dst.put_u32(*n),
        Frame::Cancel { .. } => {}
        Frame::Payload { next, .. } => {
            if let Some(payload) = next {
                wire::put_payload(dst, payload)?;
            }
        }
        Frame::Error { code, message, .. } => {
            dst.put_u32(code.as_u32());
            dst.put_slice(message.as_bytes());
        }
        Frame::MetadataPush { metadata } => dst.put_slice(metadata),
        Frame::Resume { token, last_received_server_position, first_available_client_position } => {
            encode_token(token, dst)?;
            dst.put_u64(*last_received_server_position);
            dst.put_u64(*first_available_client_position);
        }
        Frame::ResumeOk { last_received_client_position } => dst.put_u64(*last_received_client_position),
    }
    Ok(())
}

fn encode_setup(setup: &SetupPayload, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let millis = |duration: std::time::Duration| u32::try_from(duration.as_millis()).unwrap_or(u32::MAX);

    dst.put_u16(setup.version().major);
    dst.put_u16(setup.version().minor);
    dst.put_u32(millis(setup.keepalive_interval()));
    dst.put_u32(millis(setup.max_lifetime()));
    if let Some(token) = setup.token() {
        encode_token(token, dst)?;
    }
    wire::put_short_str(dst, setup.metadata_mime_type(), "metadata mime type")?;
    wire::put_short_str(dst, setup.data_mime_type(), "data mime type")?;
    wire::put_payload(dst, setup.payload())
}

fn encode_token(token: &ResumeToken, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let len = u16::try_from(token.len()).map_err(|_e| ProtocolError::invalid_frame("resume token longer than 65535 bytes"))?;
    dst.put_u16(len);
    dst.put_slice(token.as_bytes());
    Ok(())
}
