//! Primitive field readers and writers shared by the frame decoder and encoder.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ensure;
use crate::frame::{Payload, flags};
use crate::protocol::ProtocolError;

pub(crate) const U24_MAX: usize = 0xFF_FFFF;

#[inline]
pub(crate) fn need(buf: &Bytes, len: usize, field: &str) -> Result<(), ProtocolError> {
    ensure!(buf.remaining() >= len, ProtocolError::truncated(format!("{field} needs {len} bytes, {} left", buf.remaining())));
    Ok(())
}

pub(crate) fn get_u16(buf: &mut Bytes, field: &str) -> Result<u16, ProtocolError> {
    need(buf, 2, field)?;
    Ok(buf.get_u16())
}

pub(crate) fn get_u32(buf: &mut Bytes, field: &str) -> Result<u32, ProtocolError> {
    need(buf, 4, field)?;
    Ok(buf.get_u32())
}

pub(crate) fn get_u64(buf: &mut Bytes, field: &str) -> Result<u64, ProtocolError> {
    need(buf, 8, field)?;
    Ok(buf.get_u64())
}

pub(crate) fn get_u24(buf: &mut Bytes, field: &str) -> Result<usize, ProtocolError> {
    need(buf, 3, field)?;
    Ok(buf.get_uint(3) as usize)
}

pub(crate) fn put_u24(dst: &mut BytesMut, value: usize) -> Result<(), ProtocolError> {
    ensure!(value <= U24_MAX, ProtocolError::too_large_frame(value, U24_MAX));
    dst.put_uint(value as u64, 3);
    Ok(())
}

pub(crate) fn take(buf: &mut Bytes, len: usize, field: &str) -> Result<Bytes, ProtocolError> {
    need(buf, len, field)?;
    Ok(buf.split_to(len))
}

/// Reads a string prefixed by a one byte length.
pub(crate) fn get_short_str(buf: &mut Bytes, field: &str) -> Result<String, ProtocolError> {
    need(buf, 1, field)?;
    let len = usize::from(buf.get_u8());
    let bytes = take(buf, len, field)?;
    into_string(bytes, field)
}

pub(crate) fn put_short_str(dst: &mut BytesMut, value: &str, field: &str) -> Result<(), ProtocolError> {
    let len = u8::try_from(value.len()).map_err(|_e| ProtocolError::invalid_frame(format!("{field} longer than 255 bytes")))?;
    dst.put_u8(len);
    dst.put_slice(value.as_bytes());
    Ok(())
}

pub(crate) fn into_string(bytes: Bytes, field: &str) -> Result<String, ProtocolError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| ProtocolError::invalid_frame(format!("{field} is not utf8: {e}")))
}

/// Reads `[metadata_len:u24 metadata]? data` where metadata presence is given by the flags.
pub(crate) fn get_payload(buf: &mut Bytes, frame_flags: u8) -> Result<Payload, ProtocolError> {
    let metadata = if frame_flags & flags::METADATA != 0 {
        let len = get_u24(buf, "metadata length")?;
        Some(take(buf, len, "metadata")?)
    } else {
        None
    };
    let data = buf.split_to(buf.remaining());
    Ok(Payload::from_parts(metadata, data))
}

pub(crate) fn put_payload(dst: &mut BytesMut, payload: &Payload) -> Result<(), ProtocolError> {
    if let Some(metadata) = payload.metadata() {
        put_u24(dst, metadata.len())?;
        dst.put_slice(metadata);
    }
    dst.put_slice(payload.data());
    Ok(())
}
