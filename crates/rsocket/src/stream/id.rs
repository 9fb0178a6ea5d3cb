use crate::frame::StreamId;
use crate::protocol::StreamError;

/// Hands out stream identifiers for streams this side originates.
///
/// Clients use odd ids, servers even ones, each stepping by two. Ids are fresh until the space up
/// to `limit` is used up; after that the allocator wraps around and only reuses ids that no live
/// stream holds.
#[derive(Debug, Clone)]
pub struct StreamIdAllocator {
    first: u32,
    limit: u32,
    next: u32,
    wrapped: bool,
}

impl StreamIdAllocator {
    pub fn client() -> Self {
        Self::with_limit(1, StreamId::MAX)
    }

    pub fn server() -> Self {
        Self::with_limit(2, StreamId::MAX)
    }

    /// Allocator starting at `first` that never goes past `limit`.
    ///
    /// Mostly useful to exercise wrap-around without allocating billions of ids.
    pub fn with_limit(first: u32, limit: u32) -> Self {
        let limit = limit.clamp(first, StreamId::MAX);
        Self { first, limit, next: first, wrapped: false }
    }

    pub fn for_client(is_client: bool, limit: u32) -> Self {
        Self::with_limit(if is_client { 1 } else { 2 }, limit)
    }

    /// Number of ids of this parity below or at the limit.
    pub fn capacity(&self) -> usize {
        ((self.limit - self.first) / 2 + 1) as usize
    }

    /// Next id not held by a live stream.
    ///
    /// `is_live` tells whether an id is in use and `live` how many of this side's ids are. After
    /// wrap-around at most `live + 1` candidates are examined, which is always enough to find a
    /// free one when the space is not full.
    pub fn allocate(&mut self, live: usize, is_live: impl Fn(StreamId) -> bool) -> Result<StreamId, StreamError> {
        if !self.wrapped {
            if self.next <= self.limit {
                let id = self.next;
                self.next += 2;
                return Ok(StreamId::new(id));
            }
            self.wrapped = true;
            self.next = self.first;
        }

        if live >= self.capacity() {
            return Err(StreamError::IdsExhausted);
        }
        for _ in 0..=live {
            let candidate = StreamId::new(self.next);
            self.next = if self.next + 2 > self.limit { self.first } else { self.next + 2 };
            if !is_live(candidate) {
                return Ok(candidate);
            }
        }
        Err(StreamError::IdsExhausted)
    }
}
