//! Application-facing traits: the request handler and the reactive-streams signals.
//!
//! A [`RequestHandler`] answers the peer's requests. For every responder stream it gets a
//! [`SubscriberFactory`], creates a [`StreamSink`] from it and subscribes its producer to that sink.
//! Consumers of streams fed by the peer implement [`Subscriber`] and receive a
//! [`StreamSubscription`] to pull items with.

mod executor;
mod stream_handle;
mod subscriber;

pub use executor::{OffloadedSubscriber, OffloadedSubscription};
pub use stream_handle::{StreamSink, StreamSubscription, SubscriberFactory};
pub(crate) use stream_handle::StreamSlot;
pub use subscriber::{Subscriber, Subscription};

use std::panic::{AssertUnwindSafe, catch_unwind};

use bytes::Bytes;
use tracing::debug;

use crate::frame::{Payload, SetupPayload};
use crate::protocol::{HandlerError, StreamError};

/// Responder side of a session.
///
/// Every method has a default that turns the request down: request/response, streams, subscriptions
/// and channels are rejected with a `REJECTED` error, fire-and-forget and metadata pushes are
/// dropped. An `Err` returned from a method, or a panic inside it, fails only the stream it was
/// invoked for. Returning a [`StreamError`] boxed as the error picks the code the peer sees;
/// anything else is reported as an application error.
#[cfg_attr(test, mockall::automock)]
pub trait RequestHandler: Send {
    /// Called once on the server when the peer's SETUP arrives. An error refuses the connection.
    fn handle_setup(&mut self, setup: &SetupPayload) -> Result<(), HandlerError> {
        debug!(version = %setup.version(), "accepting setup");
        Ok(())
    }

    fn handle_fire_and_forget(&mut self, request: Payload) -> Result<(), HandlerError> {
        debug!(len = request.len(), "dropping fire-and-forget request");
        Ok(())
    }

    fn handle_request_response(&mut self, request: Payload, factory: SubscriberFactory) -> Result<(), HandlerError> {
        let _ = (request, factory);
        Err(Box::new(StreamError::rejected("request/response is not supported")))
    }

    fn handle_request_stream(&mut self, request: Payload, factory: SubscriberFactory) -> Result<(), HandlerError> {
        let _ = (request, factory);
        Err(Box::new(StreamError::rejected("request/stream is not supported")))
    }

    fn handle_request_subscription(&mut self, request: Payload, factory: SubscriberFactory) -> Result<(), HandlerError> {
        let _ = (request, factory);
        Err(Box::new(StreamError::rejected("request/subscription is not supported")))
    }

    /// Returns the consumer of the requester's items; the responder's own items go through a sink
    /// created from `factory`.
    fn handle_request_channel(
        &mut self,
        request: Payload,
        factory: SubscriberFactory,
    ) -> Result<Box<dyn Subscriber>, HandlerError> {
        let _ = (request, factory);
        Err(Box::new(StreamError::rejected("request/channel is not supported")))
    }

    fn handle_metadata_push(&mut self, metadata: Bytes) -> Result<(), HandlerError> {
        debug!(len = metadata.len(), "dropping metadata push");
        Ok(())
    }
}

/// A handler that relies on every default: it turns all requests down.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRequestHandler;

impl RequestHandler for DefaultRequestHandler {}

/// Runs a handler callback, turning both returned errors and panics into a stream error.
pub(crate) fn invoke<T>(f: impl FnOnce() -> Result<T, HandlerError>) -> Result<T, StreamError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(match e.downcast::<StreamError>() {
            Ok(stream_error) => *stream_error,
            Err(other) => StreamError::application(other),
        }),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(StreamError::application(format!("request handler panicked: {reason}")))
        }
    }
}
