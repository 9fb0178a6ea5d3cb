use crate::frame::Payload;
use crate::protocol::StreamError;

/// Consumer side of a stream, shaped after reactive-streams.
///
/// `on_subscribe` is always the first signal. At most one terminal signal (`on_complete` or
/// `on_error`) follows, and nothing after it. Signals are invoked from the session's serialized
/// context and must not block; see [`OffloadedSubscriber`](crate::handler::OffloadedSubscriber)
/// to run them somewhere else.
pub trait Subscriber: Send {
    fn on_subscribe(&mut self, subscription: Box<dyn Subscription>);

    fn on_next(&mut self, payload: Payload);

    fn on_complete(&mut self);

    fn on_error(&mut self, error: StreamError);
}

/// Producer side handle: how a consumer asks for more items or stops the flow.
pub trait Subscription: Send {
    /// Grants `n` more items. `n` must be positive, `0` fails the stream.
    fn request(&mut self, n: u32);

    /// Stops the flow. Calling it more than once has no further effect.
    fn cancel(&mut self);
}

impl<S: Subscriber + ?Sized> Subscriber for Box<S> {
    fn on_subscribe(&mut self, subscription: Box<dyn Subscription>) {
        (**self).on_subscribe(subscription);
    }

    fn on_next(&mut self, payload: Payload) {
        (**self).on_next(payload);
    }

    fn on_complete(&mut self) {
        (**self).on_complete();
    }

    fn on_error(&mut self, error: StreamError) {
        (**self).on_error(error);
    }
}

impl<S: Subscription + ?Sized> Subscription for Box<S> {
    fn request(&mut self, n: u32) {
        (**self).request(n);
    }

    fn cancel(&mut self) {
        (**self).cancel();
    }
}
