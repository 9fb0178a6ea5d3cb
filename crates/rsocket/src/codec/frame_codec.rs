use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{FrameDecoder, FrameEncoder};
use crate::frame::Envelope;
use crate::protocol::ProtocolError;

/// [`FrameDecoder`] and [`FrameEncoder`] in one value, for `tokio_util::codec::Framed`.
#[derive(Debug, Default)]
pub struct FrameCodec {
    decoder: FrameDecoder,
    encoder: FrameEncoder,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self { decoder: FrameDecoder::with_max_frame_length(max_frame_length), encoder: FrameEncoder::new() }
    }
}

impl Decoder for FrameCodec {
    type Item = Envelope;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }
}

impl Encoder<Envelope> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}
