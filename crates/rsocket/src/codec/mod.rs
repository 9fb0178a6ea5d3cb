//! Reference frame codec
//!
//! The engine itself only deals with decoded [`Envelope`](crate::frame::Envelope)s. This module
//! provides a length-prefixed binary codec so a session can run over any byte stream:
//!
//! - [`FrameDecoder`]: splits the inbound byte stream into envelopes
//! - [`FrameEncoder`]: writes envelopes to the outbound byte stream
//! - [`FrameCodec`]: both of the above, for `Framed`
//!
//! # Wire format
//!
//! All integers are big-endian.
//!
//! ```text
//! length:u24 | stream_id:u32 | type:u8 | flags:u8 | position:u64 | body
//! ```
//!
//! `length` counts the bytes following the length field. `position` is `0` for frames that do
//! not take part in resumption. Payload bodies are `[metadata_len:u24 metadata] data`, metadata
//! being present only when the METADATA flag is set.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use micro_rsocket::codec::{FrameDecoder, FrameEncoder};
//! use micro_rsocket::frame::{Envelope, Frame, StreamId};
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let mut buffer = BytesMut::new();
//! let envelope = Envelope::sequenced(1, Frame::Cancel { stream_id: StreamId::new(1) });
//! FrameEncoder::new().encode(envelope.clone(), &mut buffer).unwrap();
//!
//! let decoded = FrameDecoder::new().decode(&mut buffer).unwrap();
//! assert_eq!(decoded, Some(envelope));
//! ```

mod frame_codec;
mod frame_decoder;
mod frame_encoder;
mod wire;

pub use frame_codec::FrameCodec;
pub use frame_decoder::FrameDecoder;
pub use frame_encoder::FrameEncoder;

/// Largest frame the `u24` length prefix can describe.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = wire::U24_MAX;

pub(crate) const LENGTH_FIELD_LEN: usize = 3;
