use std::fmt;

use once_cell::sync::OnceCell;
use tokio::runtime::Handle;
use triomphe::Arc;

use crate::frame::{Payload, StreamId};
use crate::handler::{OffloadedSubscription, Subscriber, Subscription};
use crate::protocol::StreamError;
use crate::session::command::{CommandSender, Signal};

/// Where a handle's signals go: the id of its stream, once the session has assigned one.
///
/// Requester channels hand out their sink before the request frame is sent, so the slot is
/// filled in later by the session.
#[derive(Clone, Default)]
pub(crate) struct StreamSlot {
    id: Arc<OnceCell<StreamId>>,
}

impl StreamSlot {
    pub(crate) fn bound(stream_id: StreamId) -> Self {
        let slot = Self::default();
        slot.bind(stream_id);
        slot
    }

    pub(crate) fn unbound() -> Self {
        Self::default()
    }

    pub(crate) fn bind(&self, stream_id: StreamId) {
        let _ = self.id.set(stream_id);
    }

    pub(crate) fn get(&self) -> Option<StreamId> {
        self.id.get().copied()
    }
}

impl fmt::Debug for StreamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(id) => write!(f, "StreamSlot({id})"),
            None => f.write_str("StreamSlot(unbound)"),
        }
    }
}

/// The [`Subscription`] a local consumer receives for a stream fed by the peer.
///
/// `request(n)` becomes credit for the peer (the request frame itself for a requester that has not
/// sent it yet), `cancel()` stops the inbound flow.
#[derive(Debug)]
pub struct StreamSubscription {
    slot: StreamSlot,
    commands: CommandSender,
    canceled: bool,
}

impl StreamSubscription {
    pub(crate) fn new(slot: StreamSlot, commands: CommandSender) -> Self {
        Self { slot, commands, canceled: false }
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        self.slot.get()
    }
}

impl Subscription for StreamSubscription {
    fn request(&mut self, n: u32) {
        if !self.canceled {
            self.commands.signal(&self.slot, Signal::Request(n));
        }
    }

    fn cancel(&mut self) {
        if !self.canceled {
            self.canceled = true;
            self.commands.signal(&self.slot, Signal::Cancel);
        }
    }
}

/// The [`Subscriber`] a local producer writes into to send items to the peer.
///
/// Subscribe the producer first, then emit at most as many items as the peer requested. The
/// producer's `request(n)` tells it how much the peer is willing to take.
#[derive(Debug)]
pub struct StreamSink {
    slot: StreamSlot,
    commands: CommandSender,
    executor: Option<Handle>,
    terminated: bool,
}

impl StreamSink {
    pub(crate) fn new(slot: StreamSlot, commands: CommandSender, executor: Option<Handle>) -> Self {
        Self { slot, commands, executor, terminated: false }
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        self.slot.get()
    }
}

impl Subscriber for StreamSink {
    fn on_subscribe(&mut self, subscription: Box<dyn Subscription>) {
        let subscription = match &self.executor {
            Some(handle) => Box::new(OffloadedSubscription::spawn(handle, subscription)),
            None => subscription,
        };
        self.commands.signal(&self.slot, Signal::Subscribe(subscription));
    }

    fn on_next(&mut self, payload: Payload) {
        if !self.terminated {
            self.commands.signal(&self.slot, Signal::Next(payload));
        }
    }

    fn on_complete(&mut self) {
        if !self.terminated {
            self.terminated = true;
            self.commands.signal(&self.slot, Signal::Complete);
        }
    }

    fn on_error(&mut self, error: StreamError) {
        if !self.terminated {
            self.terminated = true;
            self.commands.signal(&self.slot, Signal::Error(error));
        }
    }
}

/// Handed to a [`RequestHandler`](crate::handler::RequestHandler) for every responder stream.
///
/// The handler creates the stream's sink through it and subscribes its producer to that sink,
/// either right away or later from another task.
#[derive(Debug)]
pub struct SubscriberFactory {
    stream_id: StreamId,
    commands: CommandSender,
}

impl SubscriberFactory {
    pub(crate) fn new(stream_id: StreamId, commands: CommandSender) -> Self {
        Self { stream_id, commands }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// A sink whose producer subscription is invoked from the session context.
    pub fn create_subscriber(&self) -> StreamSink {
        StreamSink::new(StreamSlot::bound(self.stream_id), self.commands.clone(), None)
    }

    /// A sink whose producer subscription (`request`/`cancel`) runs on `handle` instead.
    pub fn create_subscriber_on(&self, handle: Handle) -> StreamSink {
        StreamSink::new(StreamSlot::bound(self.stream_id), self.commands.clone(), Some(handle))
    }
}
