use bytes::Bytes;

/// An opaque metadata/data pair carried by request and PAYLOAD frames.
///
/// The engine never looks inside either part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    metadata: Option<Bytes>,
    data: Bytes,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { metadata: None, data: data.into() }
    }

    pub fn with_metadata(data: impl Into<Bytes>, metadata: impl Into<Bytes>) -> Self {
        Self { metadata: Some(metadata.into()), data: data.into() }
    }

    pub fn from_parts(metadata: Option<Bytes>, data: Bytes) -> Self {
        Self { metadata, data }
    }

    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn metadata(&self) -> Option<&Bytes> {
        self.metadata.as_ref()
    }

    pub fn into_parts(self) -> (Option<Bytes>, Bytes) {
        (self.metadata, self.data)
    }

    /// Number of bytes carried, metadata included.
    pub fn len(&self) -> usize {
        self.data.len() + self.metadata.as_ref().map_or(0, Bytes::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&'static str> for Payload {
    fn from(data: &'static str) -> Self {
        Self::new(Bytes::from_static(data.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(data: String) -> Self {
        Self::new(data)
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}
