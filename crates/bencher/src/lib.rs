use bytes::BytesMut;
use micro_rsocket::codec::FrameEncoder;
use micro_rsocket::frame::{Envelope, Frame, Payload, StreamId};
use tokio_util::codec::Encoder;

#[derive(Debug, Copy, Clone)]
pub struct TestCase {
    name: &'static str,
    group: TestGroup,
    shape: PayloadShape,
}

impl TestCase {
    pub fn new(name: &'static str, group: TestGroup, shape: PayloadShape) -> Self {
        Self { name, group, shape }
    }

    pub fn small(name: &'static str, shape: PayloadShape) -> Self {
        Self::new(name, TestGroup::Small, shape)
    }

    pub fn normal(name: &'static str, shape: PayloadShape) -> Self {
        Self::new(name, TestGroup::Normal, shape)
    }

    pub fn large(name: &'static str, shape: PayloadShape) -> Self {
        Self::new(name, TestGroup::Large, shape)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> TestGroup {
        self.group
    }

    pub fn shape(&self) -> &PayloadShape {
        &self.shape
    }

    /// The PAYLOAD frames of this case, positioned from 1 on a single stream.
    pub fn envelopes(&self) -> Vec<Envelope> {
        let data = vec![b'd'; self.shape.data_len];
        let metadata = vec![b'm'; self.shape.metadata_len];
        (1u64..)
            .take(self.shape.frames)
            .map(|position| {
                let payload = if metadata.is_empty() {
                    Payload::new(data.clone())
                } else {
                    Payload::with_metadata(data.clone(), metadata.clone())
                };
                Envelope::sequenced(position, Frame::Payload { stream_id: StreamId::new(1), next: Some(payload), complete: false })
            })
            .collect()
    }

    /// The envelopes of this case, encoded back to back.
    pub fn encoded(&self) -> BytesMut {
        let mut buffer = BytesMut::new();
        let mut encoder = FrameEncoder::new();
        for envelope in self.envelopes() {
            encoder.encode(envelope, &mut buffer).expect("benchmark frames should be encodable");
        }
        buffer
    }
}

/// Size and count of the PAYLOAD frames a case runs through the codec.
#[derive(Debug, Copy, Clone)]
pub struct PayloadShape {
    frames: usize,
    data_len: usize,
    metadata_len: usize,
}

impl PayloadShape {
    pub const fn new(frames: usize, data_len: usize, metadata_len: usize) -> Self {
        Self { frames, data_len, metadata_len }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn data_len(&self) -> usize {
        self.data_len
    }

    pub fn metadata_len(&self) -> usize {
        self.metadata_len
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TestGroup {
    Small,
    Normal,
    Large,
}
