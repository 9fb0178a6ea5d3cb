use std::fmt;

/// Identifier of a logical stream within a session.
///
/// `0` is reserved for connection-level frames. Client-initiated streams are odd,
/// server-initiated streams are even.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StreamId(u32);

impl StreamId {
    /// The connection-level identifier carried by SETUP, KEEPALIVE, LEASE, METADATA_PUSH, etc.
    pub const CONNECTION: StreamId = StreamId(0);

    /// Largest identifier representable on the wire (31 bits).
    pub const MAX: u32 = 0x7FFF_FFFF;

    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_connection(self) -> bool {
        self.0 == 0
    }

    /// Returns true if a client would have allocated this identifier.
    #[inline]
    pub const fn is_client_initiated(self) -> bool {
        self.0 % 2 == 1
    }
}

impl From<u32> for StreamId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
