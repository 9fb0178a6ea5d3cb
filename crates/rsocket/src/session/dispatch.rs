use tracing::{debug, error, warn};

use crate::frame::{Frame, Payload, StreamId};
use crate::handler::{StreamSlot, StreamSubscription, SubscriberFactory, invoke};
use crate::protocol::StreamError;
use crate::session::engine::SessionCore;
use crate::stream::{Interaction, StreamMachine};

impl SessionCore {
    /// Hands an inbound request to the handler and opens the responder side of the stream.
    ///
    /// Handler errors and panics fail only the requested stream.
    pub(super) fn dispatch_request(&mut self, frame: Frame) {
        match frame {
            Frame::RequestFnf { stream_id, payload } => {
                let handler = self.handler_mut();
                if let Err(e) = invoke(|| handler.handle_fire_and_forget(payload)) {
                    error!(%stream_id, cause = %e, "fire-and-forget handler failed");
                }
            }
            Frame::RequestResponse { stream_id, payload } => self.respond(stream_id, Interaction::Response, 1, payload),
            Frame::RequestStream { stream_id, initial_n, payload } => {
                self.respond(stream_id, Interaction::Stream, initial_n, payload);
            }
            Frame::RequestSubscription { stream_id, initial_n, payload } => {
                self.respond(stream_id, Interaction::Subscription, initial_n, payload);
            }
            Frame::RequestChannel { stream_id, initial_n, payload, complete } => {
                self.respond_channel(stream_id, initial_n, payload, complete);
            }
            other => warn!(frame_type = ?other.frame_type(), "not a request frame"),
        }
    }

    fn respond(&mut self, stream_id: StreamId, interaction: Interaction, initial_n: u32, payload: Payload) {
        if initial_n == 0 {
            return self.reject(stream_id, StreamError::InvalidCredit { requested: initial_n });
        }
        let factory = SubscriberFactory::new(stream_id, self.commands().clone());
        let handler = self.handler_mut();
        let result = invoke(|| match interaction {
            Interaction::Response => handler.handle_request_response(payload, factory),
            Interaction::Stream => handler.handle_request_stream(payload, factory),
            Interaction::Subscription | Interaction::Channel => handler.handle_request_subscription(payload, factory),
        });

        match result {
            Ok(()) => {
                debug!(%stream_id, ?interaction, "responder stream opened");
                self.register(StreamMachine::responder(stream_id, interaction, initial_n));
            }
            Err(e) => self.reject(stream_id, e),
        }
    }

    fn respond_channel(&mut self, stream_id: StreamId, initial_n: u32, payload: Payload, complete: bool) {
        if initial_n == 0 {
            return self.reject(stream_id, StreamError::InvalidCredit { requested: initial_n });
        }
        let commands = self.commands().clone();
        let factory = SubscriberFactory::new(stream_id, commands.clone());
        let handler = self.handler_mut();

        match invoke(|| handler.handle_request_channel(payload, factory)) {
            Ok(consumer) => {
                debug!(%stream_id, peer_complete = complete, "responder channel opened");
                let mut machine = StreamMachine::channel_responder(stream_id, initial_n, consumer, complete);
                machine.subscribe_consumer(Box::new(StreamSubscription::new(StreamSlot::bound(stream_id), commands)));
                self.register(machine);
            }
            Err(e) => self.reject(stream_id, e),
        }
    }

    fn reject(&mut self, stream_id: StreamId, error: StreamError) {
        warn!(%stream_id, cause = %error, "failing inbound request");
        self.emit(Frame::error(stream_id, error.code(), error.message()));
    }
}
