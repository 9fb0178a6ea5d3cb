//! Running application callbacks on a caller-chosen tokio runtime.
//!
//! The session invokes subscribers and subscriptions from its own serialized context. Wrapping
//! one in an offloaded adapter forwards every signal, in order, to a task spawned on the given
//! [`Handle`], so slow application code never stalls the session.

use std::fmt;

use futures::StreamExt;
use futures::channel::mpsc;
use tokio::runtime::Handle;
use tracing::debug;

use crate::frame::Payload;
use crate::handler::{Subscriber, Subscription};
use crate::protocol::StreamError;

enum SubscriberSignal {
    Subscribe(Box<dyn Subscription>),
    Next(Payload),
    Complete,
    Error(StreamError),
}

enum SubscriptionSignal {
    Request(u32),
    Cancel,
}

/// A [`Subscriber`] that replays its signals to an inner subscriber on another runtime.
pub struct OffloadedSubscriber {
    signals: mpsc::UnboundedSender<SubscriberSignal>,
}

impl fmt::Debug for OffloadedSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadedSubscriber").field("terminated", &self.signals.is_closed()).finish()
    }
}

impl OffloadedSubscriber {
    pub fn spawn<S: Subscriber + 'static>(handle: &Handle, inner: S) -> Self {
        let (signals, mut receiver) = mpsc::unbounded::<SubscriberSignal>();
        handle.spawn(async move {
            let mut inner = inner;
            while let Some(signal) = receiver.next().await {
                match signal {
                    SubscriberSignal::Subscribe(subscription) => inner.on_subscribe(subscription),
                    SubscriberSignal::Next(payload) => inner.on_next(payload),
                    SubscriberSignal::Complete => {
                        inner.on_complete();
                        break;
                    }
                    SubscriberSignal::Error(error) => {
                        inner.on_error(error);
                        break;
                    }
                }
            }
        });
        Self { signals }
    }

    fn forward(&self, signal: SubscriberSignal) {
        if self.signals.unbounded_send(signal).is_err() {
            debug!("offloaded subscriber already terminated");
        }
    }
}

impl Subscriber for OffloadedSubscriber {
    fn on_subscribe(&mut self, subscription: Box<dyn Subscription>) {
        self.forward(SubscriberSignal::Subscribe(subscription));
    }

    fn on_next(&mut self, payload: Payload) {
        self.forward(SubscriberSignal::Next(payload));
    }

    fn on_complete(&mut self) {
        self.forward(SubscriberSignal::Complete);
    }

    fn on_error(&mut self, error: StreamError) {
        self.forward(SubscriberSignal::Error(error));
    }
}

/// A [`Subscription`] whose `request`/`cancel` run on another runtime.
pub struct OffloadedSubscription {
    signals: mpsc::UnboundedSender<SubscriptionSignal>,
}

impl fmt::Debug for OffloadedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadedSubscription").field("terminated", &self.signals.is_closed()).finish()
    }
}

impl OffloadedSubscription {
    pub fn spawn(handle: &Handle, inner: Box<dyn Subscription>) -> Self {
        let (signals, mut receiver) = mpsc::unbounded::<SubscriptionSignal>();
        handle.spawn(async move {
            let mut inner = inner;
            while let Some(signal) = receiver.next().await {
                match signal {
                    SubscriptionSignal::Request(n) => inner.request(n),
                    SubscriptionSignal::Cancel => {
                        inner.cancel();
                        break;
                    }
                }
            }
        });
        Self { signals }
    }
}

impl Subscription for OffloadedSubscription {
    fn request(&mut self, n: u32) {
        let _ = self.signals.unbounded_send(SubscriptionSignal::Request(n));
    }

    fn cancel(&mut self) {
        let _ = self.signals.unbounded_send(SubscriptionSignal::Cancel);
    }
}
