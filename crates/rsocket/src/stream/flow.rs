//! Credit accounting for the two directions of a stream.
//!
//! [`Inbound`] is the half where the peer produces and a local [`Subscriber`] consumes; it tracks
//! how much credit was granted to the peer. [`Outbound`] is the half where a local producer emits
//! toward the peer; it tracks how much the peer granted.

use tracing::debug;

use crate::frame::Payload;
use crate::handler::{Subscriber, Subscription};
use crate::protocol::StreamError;
use crate::utils::clamp_credit;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum InboundState {
    Open,
    /// The peer completed but the local completion signal waits for the other direction.
    CompletePending,
    Closed,
}

pub(crate) struct Inbound {
    subscriber: Box<dyn Subscriber>,
    outstanding: u64,
    state: InboundState,
}

impl Inbound {
    pub(crate) fn new(subscriber: Box<dyn Subscriber>) -> Self {
        Self { subscriber, outstanding: 0, state: InboundState::Open }
    }

    pub(crate) fn subscribe(&mut self, subscription: Box<dyn Subscription>) {
        self.subscriber.on_subscribe(subscription);
    }

    pub(crate) fn state(&self) -> InboundState {
        self.state
    }

    /// No more items are accepted.
    pub(crate) fn is_done(&self) -> bool {
        self.state != InboundState::Open
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state == InboundState::Closed
    }

    pub(crate) fn outstanding(&self) -> u64 {
        self.outstanding
    }

    /// Records credit granted to the peer.
    pub(crate) fn grant(&mut self, n: u32) -> Result<(), StreamError> {
        if n == 0 {
            return Err(StreamError::InvalidCredit { requested: n });
        }
        self.outstanding = self.outstanding.saturating_add(u64::from(n));
        Ok(())
    }

    /// Sets the credit to exactly one, for single-item responses.
    pub(crate) fn grant_single(&mut self) {
        self.outstanding = 1;
    }

    /// Delivers an item, consuming one credit.
    pub(crate) fn deliver(&mut self, payload: Payload) -> Result<(), StreamError> {
        if self.is_done() {
            debug!("dropping item received after inbound terminated");
            return Ok(());
        }
        if self.outstanding == 0 {
            return Err(StreamError::CreditExceeded);
        }
        self.outstanding -= 1;
        self.subscriber.on_next(payload);
        Ok(())
    }

    /// Marks the peer's completion, delivering it now or leaving it pending.
    pub(crate) fn complete(&mut self, deliver_now: bool) {
        if self.state != InboundState::Open {
            return;
        }
        if deliver_now {
            self.state = InboundState::Closed;
            self.subscriber.on_complete();
        } else {
            self.state = InboundState::CompletePending;
        }
    }

    /// Delivers a completion left pending by [`Inbound::complete`].
    pub(crate) fn release_pending(&mut self) {
        if self.state == InboundState::CompletePending {
            self.state = InboundState::Closed;
            self.subscriber.on_complete();
        }
    }

    pub(crate) fn fail(&mut self, error: StreamError) {
        if self.state != InboundState::Closed {
            self.state = InboundState::Closed;
            self.subscriber.on_error(error);
        }
    }

    /// Local cancellation: stop accepting items without signaling the subscriber.
    pub(crate) fn cancel(&mut self) {
        self.state = InboundState::Closed;
    }
}

pub(crate) struct Outbound {
    subscription: Option<Box<dyn Subscription>>,
    subscribed: bool,
    credit: u64,
    unforwarded: u64,
    done: bool,
}

impl Outbound {
    /// Outbound half that the peer already granted `initial` items.
    pub(crate) fn with_credit(initial: u32) -> Self {
        Self { subscription: None, subscribed: false, credit: u64::from(initial), unforwarded: u64::from(initial), done: false }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn credit(&self) -> u64 {
        self.credit
    }

    /// Credit granted by the peer, forwarded to the producer once it is subscribed.
    pub(crate) fn add_credit(&mut self, n: u32) -> Result<(), StreamError> {
        if n == 0 {
            return Err(StreamError::InvalidCredit { requested: n });
        }
        if self.done {
            return Ok(());
        }
        self.credit = self.credit.saturating_add(u64::from(n));
        match &mut self.subscription {
            Some(subscription) => subscription.request(n),
            None => self.unforwarded = self.unforwarded.saturating_add(u64::from(n)),
        }
        Ok(())
    }

    /// Attaches the local producer. A producer arriving after termination, or a second one, is
    /// canceled.
    pub(crate) fn subscribe(&mut self, mut subscription: Box<dyn Subscription>) {
        if self.done || self.subscribed {
            subscription.cancel();
            return;
        }
        self.subscribed = true;
        while self.unforwarded > 0 {
            let n = clamp_credit(self.unforwarded);
            self.unforwarded -= u64::from(n);
            subscription.request(n);
        }
        self.subscription = Some(subscription);
    }

    /// Accounts for one item the producer wants to emit.
    pub(crate) fn take(&mut self) -> Result<(), StreamError> {
        if !self.subscribed {
            return Err(StreamError::NotSubscribed);
        }
        if self.credit == 0 {
            return Err(StreamError::CreditExceeded);
        }
        self.credit -= 1;
        Ok(())
    }

    /// The producer finished on its own.
    pub(crate) fn finish(&mut self) {
        self.done = true;
        self.subscription = None;
    }

    /// Stops the producer.
    pub(crate) fn cancel(&mut self) {
        self.done = true;
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }
}
