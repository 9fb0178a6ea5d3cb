use std::collections::HashMap;

use crate::frame::StreamId;
use crate::protocol::StreamError;
use crate::stream::StreamIdAllocator;
use crate::stream::machine::StreamMachine;

/// Live streams of one session, keyed by id, plus the allocator for locally originated ones.
pub(crate) struct StreamRegistry {
    allocator: StreamIdAllocator,
    streams: HashMap<StreamId, StreamMachine>,
    is_client: bool,
}

impl StreamRegistry {
    pub(crate) fn new(allocator: StreamIdAllocator, is_client: bool) -> Self {
        Self { allocator, streams: HashMap::new(), is_client }
    }

    /// Next free id for a stream this side originates.
    pub(crate) fn allocate(&mut self) -> Result<StreamId, StreamError> {
        let is_client = self.is_client;
        let local = self.streams.keys().filter(|id| id.is_client_initiated() == is_client).count();
        let streams = &self.streams;
        self.allocator.allocate(local, |id| streams.contains_key(&id))
    }

    /// Whether `id` has the parity of streams the peer originates.
    pub(crate) fn is_peer_id(&self, id: StreamId) -> bool {
        id.is_client_initiated() != self.is_client
    }

    pub(crate) fn register(&mut self, machine: StreamMachine) {
        self.streams.insert(machine.id(), machine);
    }

    pub(crate) fn contains(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    pub(crate) fn lookup(&mut self, id: StreamId) -> Option<&mut StreamMachine> {
        self.streams.get_mut(&id)
    }

    pub(crate) fn release(&mut self, id: StreamId) -> Option<StreamMachine> {
        self.streams.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }

    /// Removes every stream, for session teardown.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = StreamMachine> + '_ {
        self.streams.drain().map(|(_, machine)| machine)
    }
}
