use tracing::{debug, warn};

use crate::frame::{Frame, Payload, StreamId};
use crate::handler::{Subscriber, Subscription};
use crate::protocol::StreamError;
use crate::session::command::Signal;
use crate::stream::flow::{Inbound, Outbound};

/// The interaction model a stream was opened with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Interaction {
    Response,
    Stream,
    Subscription,
    Channel,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Requester,
    Responder,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Progress {
    Live,
    Terminated,
}

/// State of one stream, from either side.
///
/// A stream is made of up to two halves. The inbound half exists when a local subscriber consumes
/// items from the peer (every requester, and a channel responder), the outbound half when a local
/// producer emits toward the peer (every responder, and a channel requester). The stream is over
/// once every half it has is terminal.
///
/// Transitions never touch the transport; frames to send are pushed onto `out`.
pub(crate) struct StreamMachine {
    id: StreamId,
    interaction: Interaction,
    role: Role,
    /// Requester only: the request payload until the first `request(n)` sends it.
    request: Option<Payload>,
    complete_with_request: bool,
    inbound: Option<Inbound>,
    outbound: Option<Outbound>,
}

impl StreamMachine {
    pub(crate) fn requester(id: StreamId, interaction: Interaction, request: Payload, subscriber: Box<dyn Subscriber>) -> Self {
        let outbound = (interaction == Interaction::Channel).then(|| Outbound::with_credit(0));
        Self {
            id,
            interaction,
            role: Role::Requester,
            request: Some(request),
            complete_with_request: false,
            inbound: Some(Inbound::new(subscriber)),
            outbound,
        }
    }

    /// Responder for response, stream and subscription requests; `initial_n` is ignored for responses.
    pub(crate) fn responder(id: StreamId, interaction: Interaction, initial_n: u32) -> Self {
        let credit = if interaction == Interaction::Response { 1 } else { initial_n };
        Self {
            id,
            interaction,
            role: Role::Responder,
            request: None,
            complete_with_request: false,
            inbound: None,
            outbound: Some(Outbound::with_credit(credit)),
        }
    }

    pub(crate) fn channel_responder(id: StreamId, initial_n: u32, consumer: Box<dyn Subscriber>, peer_complete: bool) -> Self {
        let mut inbound = Inbound::new(consumer);
        if peer_complete {
            inbound.complete(false);
        }
        Self {
            id,
            interaction: Interaction::Channel,
            role: Role::Responder,
            request: None,
            complete_with_request: false,
            inbound: Some(inbound),
            outbound: Some(Outbound::with_credit(initial_n)),
        }
    }

    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    pub(crate) fn interaction(&self) -> Interaction {
        self.interaction
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    /// Whether the peer knows about this stream.
    pub(crate) fn is_open_on_peer(&self) -> bool {
        self.request.is_none()
    }

    /// Hands the local consumer its subscription; the first signal it sees.
    pub(crate) fn subscribe_consumer(&mut self, subscription: Box<dyn Subscription>) {
        if let Some(inbound) = &mut self.inbound {
            inbound.subscribe(subscription);
        }
    }

    /// Applies a signal raised by the local consumer or producer.
    pub(crate) fn on_signal(&mut self, signal: Signal, out: &mut Vec<Frame>) -> Progress {
        match signal {
            Signal::Request(n) => self.request_more(n, out),
            Signal::Cancel => self.cancel_inbound(out),
            Signal::Subscribe(mut subscription) => {
                match &mut self.outbound {
                    Some(outbound) => outbound.subscribe(subscription),
                    None => subscription.cancel(),
                }
                self.settle()
            }
            Signal::Next(payload) => self.emit(payload, out),
            Signal::Complete => self.complete_outbound(out),
            Signal::Error(error) => {
                if !self.outbound.as_ref().is_some_and(|outbound| !outbound.is_done()) {
                    return self.settle();
                }
                if let Some(outbound) = &mut self.outbound {
                    outbound.finish();
                }
                self.fail(error, out)
            }
        }
    }

    /// Applies a stream frame received from the peer.
    pub(crate) fn on_frame(&mut self, frame: Frame, out: &mut Vec<Frame>) -> Progress {
        match frame {
            Frame::Payload { next, complete, .. } => self.receive(next, complete, out),
            Frame::RequestN { n, .. } => {
                let Some(outbound) = &mut self.outbound else {
                    warn!(stream_id = %self.id, "request n for a stream without a local producer");
                    return self.fail(StreamError::invalid("unexpected REQUEST_N"), out);
                };
                if let Err(e) = outbound.add_credit(n) {
                    return self.fail(e, out);
                }
                self.settle()
            }
            Frame::Cancel { .. } => {
                match &mut self.outbound {
                    Some(outbound) => outbound.cancel(),
                    None => debug!(stream_id = %self.id, "cancel for a stream without a local producer"),
                }
                self.settle()
            }
            Frame::Error { code, message, .. } => {
                self.abort(StreamError::from_frame(code, message));
                Progress::Terminated
            }
            other => {
                warn!(stream_id = %self.id, frame_type = ?other.frame_type(), "unexpected frame on an open stream");
                Progress::Live
            }
        }
    }

    /// Fails the stream over an item the local producer emitted but that cannot be sent. The
    /// producer is canceled and the peer gets an ERROR.
    pub(crate) fn reject_item(&mut self, error: StreamError, out: &mut Vec<Frame>) -> Progress {
        self.fail(error, out)
    }

    /// Terminates both halves locally without telling the peer.
    pub(crate) fn abort(&mut self, error: StreamError) {
        if let Some(outbound) = &mut self.outbound {
            outbound.cancel();
        }
        if let Some(inbound) = &mut self.inbound {
            inbound.fail(error);
        }
    }

    fn request_more(&mut self, n: u32, out: &mut Vec<Frame>) -> Progress {
        let Some(inbound) = &mut self.inbound else {
            return Progress::Live;
        };
        if inbound.is_done() {
            return self.settle();
        }
        if let Err(e) = inbound.grant(n) {
            return self.fail(e, out);
        }

        let id = self.id;
        match self.request.take() {
            Some(payload) => out.push(match self.interaction {
                Interaction::Response => {
                    inbound.grant_single();
                    Frame::RequestResponse { stream_id: id, payload }
                }
                Interaction::Stream => Frame::RequestStream { stream_id: id, initial_n: n, payload },
                Interaction::Subscription => Frame::RequestSubscription { stream_id: id, initial_n: n, payload },
                Interaction::Channel => {
                    Frame::RequestChannel { stream_id: id, initial_n: n, payload, complete: self.complete_with_request }
                }
            }),
            None if self.interaction == Interaction::Response => inbound.grant_single(),
            None => out.push(Frame::RequestN { stream_id: id, n }),
        }
        Progress::Live
    }

    fn cancel_inbound(&mut self, out: &mut Vec<Frame>) -> Progress {
        let Some(inbound) = &mut self.inbound else {
            return Progress::Live;
        };
        if inbound.is_closed() {
            return self.settle();
        }
        let was_open = !inbound.is_done();
        inbound.cancel();

        if self.request.take().is_some() {
            if let Some(outbound) = &mut self.outbound {
                outbound.cancel();
            }
            return Progress::Terminated;
        }
        if was_open {
            out.push(Frame::Cancel { stream_id: self.id });
        }
        self.settle()
    }

    fn emit(&mut self, payload: Payload, out: &mut Vec<Frame>) -> Progress {
        let Some(outbound) = &mut self.outbound else {
            return Progress::Live;
        };
        if outbound.is_done() {
            debug!(stream_id = %self.id, "dropping item emitted after the producer terminated");
            return self.settle();
        }
        if let Err(e) = outbound.take() {
            return self.fail(e, out);
        }
        let complete = self.interaction == Interaction::Response;
        if complete {
            outbound.finish();
        }
        out.push(Frame::Payload { stream_id: self.id, next: Some(payload), complete });
        self.settle()
    }

    fn complete_outbound(&mut self, out: &mut Vec<Frame>) -> Progress {
        let Some(outbound) = &mut self.outbound else {
            return Progress::Live;
        };
        if outbound.is_done() {
            return self.settle();
        }
        outbound.finish();
        if self.request.is_some() {
            self.complete_with_request = true;
        } else {
            out.push(Frame::Payload { stream_id: self.id, next: None, complete: true });
        }
        self.settle()
    }

    fn receive(&mut self, next: Option<Payload>, complete: bool, out: &mut Vec<Frame>) -> Progress {
        let Some(inbound) = &mut self.inbound else {
            return self.fail(StreamError::invalid("unexpected PAYLOAD"), out);
        };
        if inbound.is_done() {
            debug!(stream_id = %self.id, "dropping payload for a terminated inbound half");
            return self.settle();
        }
        let has_item = next.is_some();
        if let Some(payload) = next {
            if let Err(e) = inbound.deliver(payload) {
                return self.fail(e, out);
            }
        }
        if complete || (has_item && self.interaction == Interaction::Response) {
            let outbound_done = self.outbound.as_ref().is_none_or(Outbound::is_done);
            inbound.complete(outbound_done);
        }
        self.settle()
    }

    /// Fails the whole stream because of a local or protocol error, telling the peer if it
    /// knows the stream.
    fn fail(&mut self, error: StreamError, out: &mut Vec<Frame>) -> Progress {
        if self.is_open_on_peer() {
            out.push(Frame::error(self.id, error.code(), error.message()));
        }
        self.request = None;
        self.abort(error);
        Progress::Terminated
    }

    fn settle(&mut self) -> Progress {
        let outbound_done = self.outbound.as_ref().is_none_or(Outbound::is_done);
        if outbound_done {
            if let Some(inbound) = &mut self.inbound {
                inbound.release_pending();
            }
        }
        let inbound_done = self.inbound.as_ref().is_none_or(Inbound::is_closed);
        if inbound_done && outbound_done { Progress::Terminated } else { Progress::Live }
    }
}
