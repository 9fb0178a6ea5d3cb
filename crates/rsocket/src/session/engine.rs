use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use futures::channel::oneshot;
use tracing::{debug, error, info, trace, warn};

use crate::frame::{Envelope, ErrorCode, Frame, Payload, SetupPayload, StreamId};
use crate::handler::{RequestHandler, StreamSlot, StreamSubscription, Subscriber, invoke};
use crate::protocol::{SessionError, StreamError};
use crate::resume::{Admission, ResumeManager, ResumeToken};
use crate::session::command::{CommandSender, EngineCommand, Signal};
use crate::session::{
    Lease, ResumeOutcome, ResumeRejection, SessionConfig, SessionInfo, SessionListener, SessionRole,
};
use crate::stream::{Interaction, Progress, StreamIdAllocator, StreamMachine, StreamRegistry};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    /// No handshake yet: a client before `connect`, a server before SETUP.
    Idle,
    Connected,
    /// Resumable session without a transport.
    Disconnected,
    /// Client sent RESUME and waits for the answer.
    Resuming,
    Closed,
}

/// The sans-io session engine.
///
/// Owns the live streams, the resumption state and the application handler. Inbound envelopes,
/// commands and transport events are applied one at a time; outbound envelopes queue up and are
/// taken with [`SessionCore::poll_outbound`]. Nothing here blocks or performs io.
pub(crate) struct SessionCore {
    role: SessionRole,
    config: SessionConfig,
    state: ConnectionState,
    attached: bool,
    setup: Option<SetupPayload>,
    token: Option<ResumeToken>,
    lease: Option<Lease>,
    registry: StreamRegistry,
    resume: ResumeManager,
    handler: Box<dyn RequestHandler>,
    listener: Box<dyn SessionListener>,
    commands: CommandSender,
    outbox: VecDeque<Envelope>,
    held: VecDeque<Envelope>,
    pending_resume: Option<oneshot::Sender<ResumeOutcome>>,
    frames_read: u64,
    frames_written: u64,
}

impl SessionCore {
    pub(crate) fn new(
        role: SessionRole,
        config: SessionConfig,
        handler: Box<dyn RequestHandler>,
        listener: Box<dyn SessionListener>,
        commands: CommandSender,
    ) -> Self {
        let is_client = role == SessionRole::Client;
        let allocator = StreamIdAllocator::with_limit(if is_client { 1 } else { 2 }, config.stream_id_limit());
        Self {
            role,
            config,
            state: ConnectionState::Idle,
            attached: false,
            setup: None,
            token: None,
            lease: None,
            registry: StreamRegistry::new(allocator, is_client),
            resume: ResumeManager::new(),
            handler,
            listener,
            commands,
            outbox: VecDeque::new(),
            held: VecDeque::new(),
            pending_resume: None,
            frames_read: 0,
            frames_written: 0,
        }
    }

    pub(crate) fn role(&self) -> SessionRole {
        self.role
    }

    pub(crate) fn resume_window(&self) -> Duration {
        self.config.resume_window()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached
    }

    pub(crate) fn live_streams(&self) -> usize {
        self.registry.len()
    }

    /// Keepalive interval and max lifetime negotiated by SETUP; `None` before setup.
    pub(crate) fn keepalive(&self) -> Option<(Duration, Duration)> {
        self.setup.as_ref().map(|setup| (setup.keepalive_interval(), setup.max_lifetime()))
    }

    pub(crate) fn info(&self) -> SessionInfo {
        SessionInfo {
            role: self.role,
            token: self.token.clone(),
            sent_position: self.resume.sent_position(),
            received_position: self.resume.received_position(),
            live_streams: self.registry.len(),
            buffered_frames: self.resume.buffered(),
            frames_read: self.frames_read,
            frames_written: self.frames_written,
            lease: self.lease.clone(),
        }
    }

    /// Next envelope to write to the attached transport.
    pub(crate) fn poll_outbound(&mut self) -> Option<Envelope> {
        let envelope = self.outbox.pop_front()?;
        self.frames_written += 1;
        self.listener.on_frame_written(envelope.frame.frame_type());
        Some(envelope)
    }

    /// Client handshake over a freshly attached transport.
    pub(crate) fn connect(&mut self, setup: SetupPayload) -> Result<(), SessionError> {
        match self.state {
            ConnectionState::Idle => {}
            ConnectionState::Closed => return Err(SessionError::Closed),
            _ => return Err(SessionError::AlreadyConnected),
        }
        setup.validate()?;

        self.attached = true;
        if let Some(token) = setup.token() {
            self.token = Some(token.clone());
            self.resume.enable(self.config.replay());
            self.resume.backfill(self.held.iter());
        }
        self.emit_connection(Frame::Setup(setup.clone()));
        self.setup = Some(setup);
        self.state = ConnectionState::Connected;
        self.outbox.extend(self.held.drain(..));

        info!(resumable = self.resume.is_resumable(), "session connected");
        let info = self.info();
        self.listener.on_connected(&info);
        Ok(())
    }

    /// Server side of the handshake: validates the peer's SETUP and lets the handler accept it.
    ///
    /// A refused SETUP is answered with a connection-level ERROR and closes the session.
    pub(crate) fn accept_setup(&mut self, setup: SetupPayload) -> Result<(), SessionError> {
        if self.state != ConnectionState::Idle {
            return Err(SessionError::AlreadyConnected);
        }
        self.attached = true;

        let handler = &mut self.handler;
        let verdict = setup
            .validate()
            .and_then(|()| invoke(|| handler.handle_setup(&setup)).map_err(|e| SessionError::rejected_setup(e.message())));
        if let Err(e) = verdict {
            warn!(cause = %e, "refusing setup");
            self.emit_connection(Frame::error(StreamId::CONNECTION, e.code(), e.to_string()));
            self.close(StreamError::session_closed(&e));
            return Err(e);
        }

        if let Some(token) = setup.token() {
            self.token = Some(token.clone());
            self.resume.enable(self.config.replay());
        }
        self.setup = Some(setup);
        self.state = ConnectionState::Connected;
        self.outbox.extend(self.held.drain(..));

        info!(resumable = self.resume.is_resumable(), "accepted setup");
        let info = self.info();
        self.listener.on_connected(&info);
        Ok(())
    }

    /// The transport went away, on purpose or not.
    ///
    /// A resumable session waits for a resume, anything else closes.
    pub(crate) fn detach(&mut self, reason: &str) {
        if !self.attached {
            return;
        }
        self.attached = false;
        self.outbox.clear();

        if let Some(pending) = self.pending_resume.take() {
            let _ = pending.send(ResumeOutcome::ConnectionError(reason.to_string()));
        }

        match self.state {
            ConnectionState::Connected | ConnectionState::Resuming if self.resume.is_resumable() => {
                self.state = ConnectionState::Disconnected;
                info!(reason, sent = self.resume.sent_position(), received = self.resume.received_position(), "session disconnected");
                let info = self.info();
                self.listener.on_disconnected(&info);
            }
            ConnectionState::Closed | ConnectionState::Disconnected => {}
            _ => self.close(StreamError::session_closed(format!("transport lost: {reason}"))),
        }
    }

    /// Client: starts resuming over a freshly attached transport.
    pub(crate) fn begin_resume(&mut self, outcome: oneshot::Sender<ResumeOutcome>) {
        let rejection = match self.state {
            ConnectionState::Closed => Some(ResumeRejection::SessionClosed),
            ConnectionState::Disconnected if self.resume.is_resumable() => None,
            _ => Some(ResumeRejection::NotResumable),
        };
        let token = match (rejection, self.token.clone()) {
            (None, Some(token)) => token,
            (rejection, _) => {
                let rejection = rejection.unwrap_or(ResumeRejection::NotResumable);
                warn!(cause = %rejection, "cannot resume");
                let _ = outcome.send(ResumeOutcome::Rejected(rejection));
                return;
            }
        };

        self.attached = true;
        self.state = ConnectionState::Resuming;
        self.pending_resume = Some(outcome);
        info!(%token, received = self.resume.received_position(), "resuming session");
        self.emit_connection(Frame::Resume {
            token,
            last_received_server_position: self.resume.received_position(),
            first_available_client_position: self.resume.first_available_position(),
        });
    }

    /// Server: a RESUME for this session arrived on a new transport.
    ///
    /// Answers RESUME_OK and replays what the peer missed, or rejects the attempt and closes the
    /// session when either side can no longer replay what the other needs.
    pub(crate) fn resume_from_peer(&mut self, last_received_server_position: u64, first_available_client_position: u64) -> bool {
        if self.is_closed() {
            return false;
        }
        if self.attached {
            self.detach("superseded by resume");
        }
        self.attached = true;

        let replay = self.resume.replay_after(last_received_server_position).map_err(ResumeRejection::from);
        let replay = match replay {
            Ok(_) if !self.resume.can_receive_from(first_available_client_position) => Err(ResumeRejection::Unreachable {
                first_available: first_available_client_position,
                received: self.resume.received_position(),
            }),
            other => other,
        };

        match replay {
            Ok(frames) => {
                self.emit_connection(Frame::ResumeOk { last_received_client_position: self.resume.received_position() });
                self.reattach(frames);
                true
            }
            Err(rejection) => {
                // CONNECTION_ERROR rather than REJECTED_RESUME: the client must fail its streams too
                warn!(cause = %rejection, "cannot resume, closing session");
                self.emit_connection(Frame::error(StreamId::CONNECTION, ErrorCode::ConnectionError, rejection.to_string()));
                self.close(StreamError::resume_failed(&rejection));
                false
            }
        }
    }

    fn reattach(&mut self, replay: Vec<Envelope>) {
        debug!(frames = replay.len(), "replaying unacknowledged frames");
        self.held.clear();
        self.outbox.extend(replay);
        self.state = ConnectionState::Connected;
        info!(sent = self.resume.sent_position(), received = self.resume.received_position(), "session resumed");
        let info = self.info();
        self.listener.on_connected(&info);
    }

    /// Ends the session for good: every live stream fails with `error`.
    pub(crate) fn close(&mut self, error: StreamError) {
        if self.is_closed() {
            return;
        }
        self.state = ConnectionState::Closed;
        self.held.clear();
        if let Some(pending) = self.pending_resume.take() {
            let _ = pending.send(ResumeOutcome::Rejected(ResumeRejection::SessionClosed));
        }

        let reason = error.to_string();
        let mut streams = 0;
        for mut machine in self.registry.drain() {
            machine.abort(error.clone());
            streams += 1;
        }
        info!(reason = %reason, streams, "session closed");
        let info = self.info();
        self.listener.on_closed(&info, &reason);
    }

    /// Local close: tells the peer, then closes.
    pub(crate) fn shutdown(&mut self) {
        if self.is_closed() {
            return;
        }
        self.emit_connection(Frame::error(StreamId::CONNECTION, ErrorCode::ConnectionClose, "session closed"));
        self.close(StreamError::session_closed("closed locally"));
    }

    /// Client keepalive tick: asks the peer to respond and acknowledges what was received.
    pub(crate) fn keepalive_tick(&mut self) {
        if self.role == SessionRole::Client && self.state == ConnectionState::Connected {
            self.emit_connection(Frame::Keepalive {
                respond: true,
                last_received_position: self.resume.received_position(),
                data: Bytes::new(),
            });
        }
    }

    /// Applies one envelope received from the attached transport.
    pub(crate) fn handle_envelope(&mut self, envelope: Envelope) {
        trace!(frame_type = ?envelope.frame.frame_type(), position = ?envelope.position, "received frame");
        self.frames_read += 1;
        self.listener.on_frame_read(envelope.frame.frame_type());
        match self.state {
            ConnectionState::Connected => {}
            ConnectionState::Resuming => return self.handle_resume_answer(envelope.frame),
            ConnectionState::Idle if self.role == SessionRole::Server => return self.handle_first_frame(envelope.frame),
            state => {
                debug!(?state, frame_type = ?envelope.frame.frame_type(), "dropping frame while not connected");
                return;
            }
        }

        if self.resume.admit(&envelope) != Admission::Accept {
            return;
        }
        let frame = envelope.frame;
        if frame.stream_id().is_connection() {
            self.handle_connection_frame(frame);
        } else if frame.frame_type().is_request() {
            self.handle_request_frame(frame);
        } else {
            self.handle_stream_frame(frame);
        }
    }

    fn handle_first_frame(&mut self, frame: Frame) {
        self.attached = true;
        match frame {
            Frame::Setup(setup) => {
                let _ = self.accept_setup(setup);
            }
            other => {
                warn!(frame_type = ?other.frame_type(), "frame before setup");
                self.emit_connection(Frame::error(StreamId::CONNECTION, ErrorCode::InvalidSetup, "expected SETUP"));
                self.close(StreamError::session_closed("frame received before setup"));
            }
        }
    }

    fn handle_resume_answer(&mut self, frame: Frame) {
        match frame {
            Frame::ResumeOk { last_received_client_position } => match self.resume.replay_after(last_received_client_position) {
                Ok(frames) => {
                    if let Some(pending) = self.pending_resume.take() {
                        let _ = pending.send(ResumeOutcome::Resumed);
                    }
                    self.reattach(frames);
                }
                Err(e) => {
                    let rejection = ResumeRejection::from(e);
                    warn!(cause = %rejection, "server resumed but frames it needs are gone");
                    if let Some(pending) = self.pending_resume.take() {
                        let _ = pending.send(ResumeOutcome::Rejected(rejection.clone()));
                    }
                    self.emit_connection(Frame::error(StreamId::CONNECTION, ErrorCode::RejectedResume, rejection.to_string()));
                    self.close(StreamError::resume_failed(&rejection));
                }
            },
            Frame::Error { stream_id, code, message } if stream_id.is_connection() => {
                let rejection = ResumeRejection::Peer { code, message };
                if let Some(pending) = self.pending_resume.take() {
                    let _ = pending.send(ResumeOutcome::Rejected(rejection.clone()));
                }
                self.attached = false;
                self.outbox.clear();
                if code == ErrorCode::RejectedResume {
                    warn!(cause = %rejection, "resume rejected, streams stay pending");
                    self.state = ConnectionState::Disconnected;
                } else {
                    warn!(cause = %rejection, "peer dropped the session while resuming");
                    self.close(StreamError::resume_failed(&rejection));
                }
            }
            other => debug!(frame_type = ?other.frame_type(), "dropping frame while resuming"),
        }
    }

    fn handle_connection_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Keepalive { respond, last_received_position, data } => {
                trace!(respond, last_received_position, "keepalive");
                self.resume.acknowledge(last_received_position);
                if respond {
                    self.emit_connection(Frame::Keepalive {
                        respond: false,
                        last_received_position: self.resume.received_position(),
                        data,
                    });
                }
            }
            Frame::Lease { ttl_ms, requests, metadata } => {
                debug!(ttl_ms, requests, "lease granted");
                self.lease = Some(Lease { ttl: Duration::from_millis(u64::from(ttl_ms)), requests, metadata });
            }
            Frame::MetadataPush { metadata } => {
                let handler = &mut self.handler;
                if let Err(e) = invoke(|| handler.handle_metadata_push(metadata)) {
                    error!(cause = %e, "metadata push handler failed");
                }
            }
            Frame::Error { code, message, .. } => {
                warn!(%code, reason = %message, "connection error from peer");
                self.close(StreamError::session_closed(format!("peer closed the connection ({code}): {message}")));
            }
            Frame::Setup(_) => {
                warn!("duplicate setup");
                self.emit_connection(Frame::error(StreamId::CONNECTION, ErrorCode::InvalidSetup, "setup already received"));
            }
            other => warn!(frame_type = ?other.frame_type(), "unexpected connection frame"),
        }
    }

    fn handle_stream_frame(&mut self, frame: Frame) {
        let stream_id = frame.stream_id();
        let mut out = Vec::new();
        let progress = match self.registry.lookup(stream_id) {
            Some(machine) => machine.on_frame(frame, &mut out),
            None => {
                warn!(%stream_id, frame_type = ?frame.frame_type(), "dropping frame for unknown stream");
                return;
            }
        };
        self.settle(stream_id, progress, out);
    }

    fn handle_request_frame(&mut self, frame: Frame) {
        let stream_id = frame.stream_id();
        if self.registry.contains(stream_id) {
            warn!(%stream_id, "dropping request for a stream id already in use");
            return;
        }
        if !self.registry.is_peer_id(stream_id) {
            warn!(%stream_id, "request with a stream id of the wrong parity");
            self.emit(Frame::error(stream_id, ErrorCode::Invalid, "stream id has the wrong parity"));
            return;
        }
        self.dispatch_request(frame);
    }

    /// Applies a command from the application or a stream handle.
    pub(crate) fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::FireAndForget(payload) => {
                let checked = self.check_frame_length(&request_frame(&payload)).and_then(|()| self.registry.allocate());
                match checked {
                    Ok(stream_id) => self.emit(Frame::RequestFnf { stream_id, payload }),
                    Err(e) => warn!(cause = %e, "dropping fire-and-forget"),
                }
            }
            EngineCommand::RequestResponse { payload, subscriber } => {
                self.originate(Interaction::Response, payload, subscriber, None);
            }
            EngineCommand::RequestStream { payload, subscriber } => {
                self.originate(Interaction::Stream, payload, subscriber, None);
            }
            EngineCommand::RequestSubscription { payload, subscriber } => {
                self.originate(Interaction::Subscription, payload, subscriber, None);
            }
            EngineCommand::RequestChannel { payload, subscriber, slot } => {
                self.originate(Interaction::Channel, payload, subscriber, Some(slot));
            }
            EngineCommand::MetadataPush(metadata) => {
                let frame = Frame::MetadataPush { metadata };
                match self.check_frame_length(&frame) {
                    Ok(()) => self.emit(frame),
                    Err(e) => warn!(cause = %e, "dropping metadata push"),
                }
            }
            EngineCommand::Signal { slot, signal } => self.handle_signal(&slot, signal),
        }
    }

    fn originate(
        &mut self,
        interaction: Interaction,
        payload: Payload,
        mut subscriber: Box<dyn Subscriber>,
        channel_sink: Option<StreamSlot>,
    ) {
        let allocated = if self.is_closed() {
            Err(StreamError::session_closed("session closed"))
        } else {
            self.check_frame_length(&request_frame(&payload)).and_then(|()| self.registry.allocate())
        };
        let stream_id = match allocated {
            Ok(stream_id) => stream_id,
            Err(e) => {
                warn!(cause = %e, ?interaction, "cannot open stream");
                subscriber.on_subscribe(Box::new(StreamSubscription::new(StreamSlot::unbound(), self.commands.clone())));
                subscriber.on_error(e);
                return;
            }
        };

        debug!(%stream_id, ?interaction, "opening stream");
        let mut machine = StreamMachine::requester(stream_id, interaction, payload, subscriber);
        if let Some(slot) = channel_sink {
            slot.bind(stream_id);
        }
        machine.subscribe_consumer(Box::new(StreamSubscription::new(StreamSlot::bound(stream_id), self.commands.clone())));
        self.registry.register(machine);
    }

    fn handle_signal(&mut self, slot: &StreamSlot, signal: Signal) {
        let oversized = match &signal {
            Signal::Next(payload) => self
                .check_frame_length(&Frame::Payload { stream_id: StreamId::CONNECTION, next: Some(payload.clone()), complete: false })
                .err(),
            _ => None,
        };
        let Some(machine) = slot.get().and_then(|stream_id| self.registry.lookup(stream_id)) else {
            debug!(?slot, signal = signal.name(), "dropping signal for a finished stream");
            if let Signal::Subscribe(mut subscription) = signal {
                subscription.cancel();
            }
            return;
        };
        let stream_id = machine.id();
        let mut out = Vec::new();
        let progress = match oversized {
            Some(error) => {
                warn!(%stream_id, cause = %error, "producer emitted an item too large to send");
                machine.reject_item(error, &mut out)
            }
            None => machine.on_signal(signal, &mut out),
        };
        self.settle(stream_id, progress, out);
    }

    /// Frames larger than the transport accepts would fail the whole connection in the codec.
    fn check_frame_length(&self, frame: &Frame) -> Result<(), StreamError> {
        let size = frame.size_hint();
        let max = self.config.max_frame_length();
        if size > max {
            return Err(StreamError::invalid(format!("{:?} frame of {size} bytes exceeds the {max} byte limit", frame.frame_type())));
        }
        Ok(())
    }

    /// Sends what a stream transition produced and forgets the stream once it is terminal.
    pub(super) fn settle(&mut self, stream_id: StreamId, progress: Progress, out: Vec<Frame>) {
        for frame in out {
            self.emit(frame);
        }
        if progress == Progress::Terminated {
            if let Some(machine) = self.registry.release(stream_id) {
                debug!(%stream_id, interaction = ?machine.interaction(), role = ?machine.role(), "stream terminated");
            }
        }
    }

    pub(super) fn register(&mut self, machine: StreamMachine) {
        self.registry.register(machine);
    }

    pub(super) fn commands(&self) -> &CommandSender {
        &self.commands
    }

    pub(super) fn handler_mut(&mut self) -> &mut dyn RequestHandler {
        self.handler.as_mut()
    }

    /// Queues a resumable frame, holding it back while no transport is attached.
    pub(super) fn emit(&mut self, frame: Frame) {
        if self.is_closed() {
            debug!(frame_type = ?frame.frame_type(), "session closed, dropping frame");
            return;
        }
        let envelope = self.resume.stamp(frame);
        if self.attached && self.state == ConnectionState::Connected {
            self.outbox.push_back(envelope);
            return;
        }

        self.held.push_back(envelope);
        if self.held.len() > self.config.max_held_frames() {
            self.held.pop_front();
            if self.resume.is_resumable() {
                debug!("held frames full, relying on the replay buffer");
            } else {
                warn!(limit = self.config.max_held_frames(), "too many frames held while detached");
                self.close(StreamError::session_closed("too many frames held while not connected"));
            }
        }
    }

    /// Queues a connection-level frame, only while a transport is attached.
    fn emit_connection(&mut self, frame: Frame) {
        if self.attached {
            self.outbox.push_back(Envelope::unsequenced(frame));
        } else {
            debug!(frame_type = ?frame.frame_type(), "no transport, dropping connection frame");
        }
    }
}

/// The largest request frame `payload` can end up in, whatever the interaction.
fn request_frame(payload: &Payload) -> Frame {
    Frame::RequestChannel { stream_id: StreamId::CONNECTION, initial_n: 0, payload: payload.clone(), complete: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{DefaultRequestHandler, MockRequestHandler, StreamSink};
    use crate::frame::FrameType;
    use crate::resume::ReplayError;
    use crate::session::{LoggingListener, MockSessionListener, ReplayConfig};
    use crate::testing::{
        HandlerTap, Pair, Peer, ProducerTap, RecordingSubscriber, Script, ScriptedHandler, SubscriberTap,
    };

    fn resumable() -> SetupPayload {
        SetupPayload::builder().resume_token(ResumeToken::from_bytes("session-1")).build()
    }

    fn serving(setup: SetupPayload) -> (Pair, HandlerTap) {
        let (handler, tap) = ScriptedHandler::new(Script::Serve);
        let mut pair = Pair::new(handler);
        pair.connect(setup);
        (pair, tap)
    }

    fn request(pair: &mut Pair, interaction: Interaction, initial: u32) -> SubscriberTap {
        let (subscriber, tap) = RecordingSubscriber::new(initial);
        let payload = Payload::from("q");
        let subscriber: Box<dyn Subscriber> = Box::new(subscriber);
        let command = match interaction {
            Interaction::Response => EngineCommand::RequestResponse { payload, subscriber },
            Interaction::Subscription => EngineCommand::RequestSubscription { payload, subscriber },
            Interaction::Stream => EngineCommand::RequestStream { payload, subscriber },
            Interaction::Channel => panic!("channels are opened with open_channel"),
        };
        pair.client.command(command);
        pair.run();
        tap
    }

    /// Opens a channel from the client; returns the client's sink, its producer and its consumer.
    fn open_channel(pair: &mut Pair, initial: u32) -> (StreamSink, ProducerTap, SubscriberTap) {
        let (subscriber, consumer) = RecordingSubscriber::new(initial);
        let slot = StreamSlot::unbound();
        pair.client.command(EngineCommand::RequestChannel {
            payload: Payload::from("open"),
            subscriber: Box::new(subscriber),
            slot: slot.clone(),
        });
        let mut sink = StreamSink::new(slot, pair.client.sender(), None);
        let (producer, producer_tap) = ProducerTap::new();
        sink.on_subscribe(Box::new(producer));
        pair.run();
        (sink, producer_tap, consumer)
    }

    fn assert_idle(pair: &Pair) {
        assert_eq!(pair.client.core.live_streams(), 0);
        assert_eq!(pair.server.core.live_streams(), 0);
    }

    #[test]
    fn request_response_round_trip() {
        let (mut pair, handler) = serving(SetupPayload::default());
        let response = request(&mut pair, Interaction::Response, 1);
        assert_eq!(handler.streams(), 1);
        assert_eq!(handler.requested(0), 1);

        handler.emit(0, "pong");
        pair.run();
        assert_eq!(response.items(), vec!["pong"]);
        assert!(response.is_complete());
        assert_eq!(response.terminal_count(), 1);
        assert_idle(&pair);
    }

    #[test]
    fn stream_items_wait_for_credit() {
        let (mut pair, handler) = serving(SetupPayload::default());
        let stream = request(&mut pair, Interaction::Stream, 2);
        assert_eq!(handler.requested(0), 2);

        handler.emit(0, "item1");
        handler.emit(0, "item2");
        pair.run();
        assert_eq!(stream.items(), vec!["item1", "item2"]);
        assert_eq!(stream.terminal_count(), 0);

        stream.request(3);
        pair.run();
        assert_eq!(handler.requested(0), 5);

        handler.emit(0, "item3");
        handler.complete(0);
        pair.run();
        assert_eq!(stream.items(), vec!["item1", "item2", "item3"]);
        assert!(stream.is_complete());
        assert_idle(&pair);
    }

    #[test]
    fn subscription_stays_open_until_canceled() {
        let (mut pair, handler) = serving(SetupPayload::default());
        let subscription = request(&mut pair, Interaction::Subscription, 2);
        handler.emit(0, "tick");
        pair.run();
        assert_eq!(subscription.items(), vec!["tick"]);
        assert_eq!(pair.server.core.live_streams(), 1);

        subscription.cancel();
        pair.run();
        assert!(handler.canceled(0));
        assert_idle(&pair);
    }

    #[test]
    fn over_emission_fails_only_that_stream() {
        let (mut pair, handler) = serving(SetupPayload::default());
        let stream = request(&mut pair, Interaction::Stream, 1);

        handler.emit(0, "a");
        handler.emit(0, "b");
        pair.run();
        assert_eq!(stream.items(), vec!["a"]);
        assert!(matches!(stream.error(), Some(StreamError::Invalid { .. })));
        assert!(handler.canceled(0));
        assert_idle(&pair);

        request(&mut pair, Interaction::Stream, 1);
        assert_eq!(handler.streams(), 2);
        assert!(!pair.server.core.is_closed());
    }

    #[test]
    fn zero_credit_is_a_stream_error() {
        let (mut pair, handler) = serving(SetupPayload::default());
        let stream = request(&mut pair, Interaction::Stream, 1);

        stream.request(0);
        pair.run();
        assert_eq!(stream.error(), Some(StreamError::InvalidCredit { requested: 0 }));
        assert!(handler.canceled(0));
        assert_eq!(pair.count_delivered(SessionRole::Client, |frame| matches!(frame, Frame::Error { code: ErrorCode::Invalid, .. })), 1);
        assert!(!pair.client.core.is_closed());
        assert_idle(&pair);
    }

    #[test]
    fn cancel_is_idempotent_and_stops_delivery() {
        let (mut pair, handler) = serving(SetupPayload::default());
        let stream = request(&mut pair, Interaction::Stream, 5);
        handler.emit(0, "a");
        pair.run();

        stream.cancel();
        stream.cancel();
        pair.run();
        assert!(handler.canceled(0));
        assert_eq!(pair.count_delivered(SessionRole::Client, |frame| matches!(frame, Frame::Cancel { .. })), 1);

        handler.emit(0, "late");
        pair.server.core.handle_envelope(Envelope::unsequenced(Frame::Cancel { stream_id: StreamId::new(1) }));
        pair.run();
        assert_eq!(stream.items(), vec!["a"]);
        assert_eq!(stream.terminal_count(), 0);
        assert!(!pair.server.core.is_closed());
        assert_idle(&pair);
    }

    #[test]
    fn handler_error_becomes_application_error() {
        let (handler, tap) = ScriptedHandler::new(Script::Fail);
        let mut pair = Pair::new(handler);
        pair.connect(SetupPayload::default());

        let stream = request(&mut pair, Interaction::Stream, 1);
        assert_eq!(stream.error(), Some(StreamError::application("no such route")));
        assert_eq!(
            pair.count_delivered(SessionRole::Server, |frame| matches!(frame, Frame::Error { code: ErrorCode::ApplicationError, .. })),
            1
        );
        assert_eq!(tap.streams(), 0);
        assert!(!pair.server.core.is_closed());
        assert_idle(&pair);
    }

    #[test]
    fn handler_panic_fails_only_the_stream() {
        let (handler, _tap) = ScriptedHandler::new(Script::Panic);
        let mut pair = Pair::new(handler);
        pair.connect(SetupPayload::default());

        let response = request(&mut pair, Interaction::Response, 1);
        assert_eq!(response.error(), Some(StreamError::application("request handler panicked: handler bug")));
        assert!(!pair.server.core.is_closed());
        assert_idle(&pair);
    }

    #[test]
    fn default_handler_rejects_requests() {
        let mut pair = Pair::new(DefaultRequestHandler);
        pair.connect(SetupPayload::default());

        let stream = request(&mut pair, Interaction::Stream, 1);
        assert_eq!(stream.error(), Some(StreamError::rejected("request/stream is not supported")));
    }

    #[test]
    fn channel_completes_once_both_directions_are_done() {
        let (mut pair, handler) = serving(SetupPayload::default());
        let (mut sink, producer, consumer) = open_channel(&mut pair, 2);
        assert_eq!(handler.requested(0), 2);
        assert_eq!(producer.requested(), 4);

        for item in ["u1", "u2", "u3"] {
            sink.on_next(Payload::from(item));
        }
        sink.on_complete();
        pair.run();

        let remote = handler.consumer(0);
        assert_eq!(remote.items(), vec!["u1", "u2", "u3"]);
        assert_eq!(remote.terminal_count(), 0);
        assert_eq!(consumer.terminal_count(), 0);

        handler.emit(0, "d1");
        handler.complete(0);
        pair.run();
        assert_eq!(consumer.items(), vec!["d1"]);
        assert!(consumer.is_complete());
        assert_eq!(consumer.terminal_count(), 1);
        assert!(remote.is_complete());
        assert_eq!(remote.terminal_count(), 1);
        assert_idle(&pair);
    }

    #[test]
    fn channel_error_terminates_both_directions() {
        let (mut pair, handler) = serving(SetupPayload::default());
        let (_sink, producer, consumer) = open_channel(&mut pair, 2);

        handler.fail(0, StreamError::application("bad"));
        pair.run();
        assert_eq!(consumer.error(), Some(StreamError::application("bad")));
        assert!(producer.canceled());
        assert_eq!(handler.consumer(0).terminal_count(), 1);
        assert_idle(&pair);
    }

    #[test]
    fn fire_and_forget_and_metadata_push_reach_the_handler() {
        let (mut pair, handler) = serving(SetupPayload::default());
        pair.client.command(EngineCommand::FireAndForget(Payload::from("fnf")));
        pair.client.command(EngineCommand::MetadataPush(Bytes::from_static(b"meta")));
        pair.run();

        assert_eq!(handler.fire_and_forget(), vec!["fnf"]);
        assert_eq!(handler.metadata(), vec![Bytes::from_static(b"meta")]);
        assert_idle(&pair);
    }

    #[test]
    fn frames_queued_before_connect_follow_setup() {
        let (handler, tap) = ScriptedHandler::new(Script::Serve);
        let mut pair = Pair::new(handler);
        pair.client.command(EngineCommand::FireAndForget(Payload::from("early")));
        assert!(pair.client.outbound().is_empty());

        pair.connect(SetupPayload::default());
        assert!(matches!(pair.delivered.first(), Some((SessionRole::Client, Frame::Setup(_)))));
        assert_eq!(tap.fire_and_forget(), vec!["early"]);
    }

    #[test]
    fn too_many_held_frames_close_a_plain_session() {
        let config = SessionConfig::builder().max_held_frames(1).build();
        let mut client =
            Peer::new(SessionRole::Client, config, Box::new(DefaultRequestHandler), Box::new(LoggingListener));
        client.command(EngineCommand::FireAndForget(Payload::from("1")));
        assert!(!client.core.is_closed());
        client.command(EngineCommand::FireAndForget(Payload::from("2")));
        assert!(client.core.is_closed());
    }

    #[test]
    fn server_originated_streams_use_even_ids() {
        let (client_handler, client_tap) = ScriptedHandler::new(Script::Serve);
        let client =
            Peer::new(SessionRole::Client, SessionConfig::default(), Box::new(client_handler), Box::new(LoggingListener));
        let mut pair = Pair::with_peers(client, Peer::server(DefaultRequestHandler));
        pair.connect(SetupPayload::default());

        let (subscriber, stream) = RecordingSubscriber::new(3);
        pair.server.command(EngineCommand::RequestStream { payload: Payload::from("q"), subscriber: Box::new(subscriber) });
        pair.run();
        assert_eq!(client_tap.stream_id(0), Some(StreamId::new(2)));

        client_tap.emit(0, "x");
        client_tap.complete(0);
        pair.run();
        assert_eq!(stream.items(), vec!["x"]);
        assert!(stream.is_complete());
        assert_idle(&pair);
    }

    #[test]
    fn request_with_wrong_parity_is_refused() {
        let (mut pair, handler) = serving(SetupPayload::default());
        let stream_id = StreamId::new(2);
        pair.server.core.handle_envelope(Envelope::unsequenced(Frame::RequestStream {
            stream_id,
            initial_n: 1,
            payload: Payload::from("q"),
        }));

        let frames: Vec<Frame> = pair.server.outbound().into_iter().map(|envelope| envelope.frame).collect();
        assert!(matches!(frames.as_slice(), [Frame::Error { stream_id: id, code: ErrorCode::Invalid, .. }] if *id == stream_id));
        assert_eq!(handler.streams(), 0);
    }

    #[test]
    fn duplicate_request_and_unknown_stream_frames_are_dropped() {
        let (mut pair, handler) = serving(SetupPayload::default());
        request(&mut pair, Interaction::Stream, 1);

        pair.server.core.handle_envelope(Envelope::unsequenced(Frame::RequestStream {
            stream_id: StreamId::new(1),
            initial_n: 1,
            payload: Payload::from("again"),
        }));
        pair.client.core.handle_envelope(Envelope::unsequenced(Frame::Payload {
            stream_id: StreamId::new(9),
            next: Some(Payload::from("stray")),
            complete: false,
        }));

        assert_eq!(handler.streams(), 1);
        assert!(pair.server.outbound().is_empty());
        assert!(pair.client.outbound().is_empty());
        assert!(!pair.client.core.is_closed());
        assert!(!pair.server.core.is_closed());
    }

    #[test]
    fn malformed_setup_is_refused() {
        let (handler, _tap) = ScriptedHandler::new(Script::Serve);
        let mut server = Peer::server(handler);
        let setup = SetupPayload::builder().mime_types("", "text/plain").build();

        server.core.handle_envelope(Envelope::unsequenced(Frame::Setup(setup)));
        let frames: Vec<Frame> = server.outbound().into_iter().map(|envelope| envelope.frame).collect();
        assert!(matches!(frames.as_slice(), [Frame::Error { code: ErrorCode::InvalidSetup, .. }]));
        assert!(server.core.is_closed());
    }

    #[test]
    fn frames_before_setup_are_refused() {
        let (handler, tap) = ScriptedHandler::new(Script::Serve);
        let mut server = Peer::server(handler);

        server.core.handle_envelope(Envelope::unsequenced(Frame::RequestFnf {
            stream_id: StreamId::new(1),
            payload: Payload::from("too early"),
        }));
        let frames: Vec<Frame> = server.outbound().into_iter().map(|envelope| envelope.frame).collect();
        assert!(matches!(frames.as_slice(), [Frame::Error { code: ErrorCode::InvalidSetup, .. }]));
        assert!(server.core.is_closed());
        assert!(tap.fire_and_forget().is_empty());
    }

    #[test]
    fn handler_can_refuse_setup() {
        let mut handler = MockRequestHandler::new();
        handler.expect_handle_setup().times(1).returning(|_| Err("not welcome".into()));
        let mut server = Peer::new(SessionRole::Server, SessionConfig::default(), Box::new(handler), Box::new(LoggingListener));

        server.core.handle_envelope(Envelope::unsequenced(Frame::Setup(SetupPayload::default())));
        let frames: Vec<Frame> = server.outbound().into_iter().map(|envelope| envelope.frame).collect();
        assert!(matches!(frames.as_slice(), [Frame::Error { code: ErrorCode::RejectedSetup, .. }]));
        assert!(server.core.is_closed());
    }

    #[test]
    fn second_setup_is_answered_with_an_error() {
        let (mut pair, _handler) = serving(SetupPayload::default());
        pair.server.core.handle_envelope(Envelope::unsequenced(Frame::Setup(SetupPayload::default())));

        let frames: Vec<Frame> = pair.server.outbound().into_iter().map(|envelope| envelope.frame).collect();
        assert!(matches!(frames.as_slice(), [Frame::Error { code: ErrorCode::InvalidSetup, .. }]));
        assert!(!pair.server.core.is_closed());
    }

    #[test]
    fn lease_is_recorded() {
        let (mut pair, _handler) = serving(SetupPayload::default());
        pair.client.core.handle_envelope(Envelope::unsequenced(Frame::Lease { ttl_ms: 5000, requests: 7, metadata: None }));

        let lease = pair.client.core.info().lease;
        assert_eq!(lease, Some(Lease { ttl: Duration::from_secs(5), requests: 7, metadata: None }));
    }

    #[test]
    fn stream_ids_wrap_onto_released_ids_only() {
        let config = SessionConfig::builder().stream_id_limit(3).build();
        let client =
            Peer::new(SessionRole::Client, config, Box::new(DefaultRequestHandler), Box::new(LoggingListener));
        let (handler, tap) = ScriptedHandler::new(Script::Serve);
        let mut pair = Pair::with_peers(client, Peer::server(handler));
        pair.connect(SetupPayload::default());

        let first = request(&mut pair, Interaction::Stream, 1);
        let _second = request(&mut pair, Interaction::Stream, 1);
        let third = request(&mut pair, Interaction::Stream, 1);
        assert_eq!(third.error(), Some(StreamError::IdsExhausted));
        assert_eq!(tap.streams(), 2);

        tap.emit(0, "x");
        tap.complete(0);
        pair.run();
        assert!(first.is_complete());

        let fourth = request(&mut pair, Interaction::Stream, 1);
        assert_eq!(fourth.error(), None);
        assert_eq!(tap.stream_id(2), Some(StreamId::new(1)));
    }

    #[test]
    fn keepalive_acknowledgements_prune_replay_buffers() {
        let (mut pair, handler) = serving(resumable());
        request(&mut pair, Interaction::Stream, 10);
        for item in ["a", "b", "c"] {
            handler.emit(0, item);
        }
        pair.run();
        assert_eq!(pair.server.core.info().buffered_frames, 3);
        assert_eq!(pair.client.core.info().buffered_frames, 1);

        pair.client.core.keepalive_tick();
        pair.run();
        assert_eq!(pair.server.core.info().buffered_frames, 0);
        assert_eq!(pair.client.core.info().buffered_frames, 0);
        assert_eq!(pair.count_delivered(SessionRole::Server, |frame| matches!(frame, Frame::Keepalive { respond: false, .. })), 1);
    }

    #[test]
    fn resume_delivers_missed_frames_exactly_once() {
        let (mut pair, handler) = serving(resumable());
        let stream = request(&mut pair, Interaction::Stream, 10);
        handler.emit(0, "a");
        handler.emit(0, "b");
        pair.run();

        handler.emit(0, "c");
        handler.emit(0, "d");
        pair.disconnect();
        assert_eq!(pair.client.core.state(), ConnectionState::Disconnected);
        assert_eq!(pair.server.core.state(), ConnectionState::Disconnected);

        handler.emit(0, "e");
        stream.request(5);
        pair.client.pump();
        pair.server.pump();

        assert_eq!(pair.resume(), Some(ResumeOutcome::Resumed));
        assert_eq!(stream.items(), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(handler.requested(0), 15);
        assert_eq!(pair.server.core.state(), ConnectionState::Connected);

        pair.client.core.handle_envelope(Envelope::sequenced(
            1,
            Frame::Payload { stream_id: StreamId::new(1), next: Some(Payload::from("a")), complete: false },
        ));
        assert_eq!(stream.items().len(), 5);
    }

    #[test]
    fn request_lost_in_flight_is_replayed_once() {
        let (mut pair, handler) = serving(resumable());
        let (subscriber, stream) = RecordingSubscriber::new(2);
        pair.client.command(EngineCommand::RequestStream { payload: Payload::from("q"), subscriber: Box::new(subscriber) });
        pair.disconnect();
        assert_eq!(handler.streams(), 0);

        assert_eq!(pair.resume(), Some(ResumeOutcome::Resumed));
        assert_eq!(handler.streams(), 1);
        assert_eq!(pair.count_delivered(SessionRole::Client, |frame| matches!(frame, Frame::RequestStream { .. })), 1);

        handler.emit(0, "x");
        pair.run();
        assert_eq!(stream.items(), vec!["x"]);
    }

    #[test]
    fn delivered_request_is_not_repeated_by_resume() {
        let (mut pair, handler) = serving(resumable());
        request(&mut pair, Interaction::Stream, 2);
        pair.disconnect();

        assert_eq!(pair.resume(), Some(ResumeOutcome::Resumed));
        assert_eq!(handler.streams(), 1);
        assert_eq!(pair.count_delivered(SessionRole::Client, |frame| matches!(frame, Frame::RequestStream { .. })), 1);
    }

    fn client_with_replay_frames(max_frames: usize) -> Peer {
        let config = SessionConfig::builder()
            .replay(ReplayConfig { max_frames, max_bytes: ReplayConfig::DEFAULT_MAX_BYTES })
            .build();
        Peer::new(SessionRole::Client, config, Box::new(DefaultRequestHandler), Box::new(LoggingListener))
    }

    #[test]
    fn resume_fails_streams_once_replay_was_evicted() {
        let (handler, tap) = ScriptedHandler::new(Script::Serve);
        let config = SessionConfig::builder()
            .replay(ReplayConfig { max_frames: 2, max_bytes: ReplayConfig::DEFAULT_MAX_BYTES })
            .build();
        let server = Peer::new(SessionRole::Server, config, Box::new(handler), Box::new(LoggingListener));
        let mut pair = Pair::with_peers(Peer::client(), server);
        pair.connect(resumable());

        let stream = request(&mut pair, Interaction::Stream, 10);
        tap.emit(0, "a");
        pair.run();
        for item in ["b", "c", "d"] {
            tap.emit(0, item);
        }
        pair.disconnect();

        let outcome = pair.resume();
        assert!(matches!(
            outcome,
            Some(ResumeOutcome::Rejected(ResumeRejection::Peer { code: ErrorCode::ConnectionError, .. }))
        ));
        assert!(pair.server.core.is_closed());
        assert!(tap.canceled(0));
        assert!(pair.client.core.is_closed());
        assert!(pair.client.core.pending_resume.is_none());
        assert!(matches!(stream.error(), Some(StreamError::ResumeFailed { .. })));
        assert_eq!(stream.terminal_count(), 1);
    }

    #[test]
    fn unknown_session_rejection_keeps_streams_pending() {
        let (mut pair, _handler) = serving(resumable());
        let stream = request(&mut pair, Interaction::Stream, 1);
        pair.disconnect();

        let (outcome, mut receiver) = oneshot::channel();
        pair.client.core.begin_resume(outcome);
        pair.client.outbound();
        pair.client.core.handle_envelope(Envelope::unsequenced(Frame::error(
            StreamId::CONNECTION,
            ErrorCode::RejectedResume,
            "unknown resume token",
        )));

        assert!(matches!(
            receiver.try_recv().unwrap(),
            Some(ResumeOutcome::Rejected(ResumeRejection::Peer { code: ErrorCode::RejectedResume, .. }))
        ));
        assert_eq!(pair.client.core.state(), ConnectionState::Disconnected);
        assert_eq!(pair.client.core.live_streams(), 1);
        assert_eq!(stream.terminal_count(), 0);
    }

    #[test]
    fn transport_lost_while_resuming_is_a_connection_error() {
        let (mut pair, handler) = serving(resumable());
        let stream = request(&mut pair, Interaction::Stream, 10);
        pair.disconnect();

        let (outcome, mut receiver) = oneshot::channel();
        pair.client.core.begin_resume(outcome);
        assert_eq!(pair.client.core.state(), ConnectionState::Resuming);
        pair.client.core.detach("reset during resume");

        assert_eq!(receiver.try_recv().unwrap(), Some(ResumeOutcome::ConnectionError("reset during resume".into())));
        assert!(pair.client.core.pending_resume.is_none());
        assert_eq!(pair.client.core.state(), ConnectionState::Disconnected);
        assert_eq!(pair.client.core.live_streams(), 1);
        assert_eq!(stream.terminal_count(), 0);

        assert_eq!(pair.resume(), Some(ResumeOutcome::Resumed));
        handler.emit(0, "after");
        pair.run();
        assert_eq!(stream.items(), vec!["after"]);
    }

    #[test]
    fn resume_ok_for_frames_the_client_evicted_fails_the_session() {
        let (handler, tap) = ScriptedHandler::new(Script::Serve);
        let mut pair = Pair::with_peers(client_with_replay_frames(2), Peer::server(handler));
        pair.connect(resumable());

        let stream = request(&mut pair, Interaction::Stream, 10);
        stream.request(1);
        stream.request(1);
        pair.client.pump();
        pair.disconnect();

        let (outcome, mut receiver) = oneshot::channel();
        pair.client.core.begin_resume(outcome);
        stream.request(1);
        pair.client.pump();
        pair.run();

        assert!(matches!(
            receiver.try_recv().unwrap(),
            Some(ResumeOutcome::Rejected(ResumeRejection::Replay(ReplayError::Evicted { requested: 1, first_available: 3 })))
        ));
        assert!(pair.client.core.pending_resume.is_none());
        assert!(pair.client.core.is_closed());
        assert!(matches!(stream.error(), Some(StreamError::ResumeFailed { .. })));
        assert_eq!(stream.terminal_count(), 1);
        assert!(pair.server.core.is_closed());
        assert!(tap.canceled(0));
    }

    #[test]
    fn server_refuses_resume_it_cannot_receive_from() {
        let (handler, tap) = ScriptedHandler::new(Script::Serve);
        let mut pair = Pair::with_peers(client_with_replay_frames(2), Peer::server(handler));
        pair.connect(resumable());

        let stream = request(&mut pair, Interaction::Stream, 10);
        for _ in 0..3 {
            stream.request(1);
        }
        pair.client.pump();
        pair.disconnect();
        assert_eq!(pair.client.core.resume.first_available_position(), 3);

        let outcome = pair.resume();
        assert!(matches!(
            outcome,
            Some(ResumeOutcome::Rejected(ResumeRejection::Peer { code: ErrorCode::ConnectionError, .. }))
        ));
        assert!(pair.client.core.pending_resume.is_none());
        assert!(pair.server.core.is_closed());
        assert!(tap.canceled(0));
        assert!(pair.client.core.is_closed());
        assert!(matches!(stream.error(), Some(StreamError::ResumeFailed { .. })));
        assert_eq!(stream.terminal_count(), 1);
    }

    #[test]
    fn oversized_requests_fail_without_reaching_the_transport() {
        let config = SessionConfig::builder().max_frame_length(64).build();
        let client = Peer::new(SessionRole::Client, config, Box::new(DefaultRequestHandler), Box::new(LoggingListener));
        let (handler, tap) = ScriptedHandler::new(Script::Serve);
        let mut pair = Pair::with_peers(client, Peer::server(handler));
        pair.connect(resumable());
        let big = "x".repeat(100);

        let (subscriber, rejected) = RecordingSubscriber::new(1);
        pair.client.command(EngineCommand::RequestStream { payload: Payload::from(big.clone()), subscriber: Box::new(subscriber) });
        pair.client.command(EngineCommand::FireAndForget(Payload::from(big.clone())));
        pair.client.command(EngineCommand::MetadataPush(Bytes::from(big)));
        pair.run();

        assert!(matches!(rejected.error(), Some(StreamError::Invalid { .. })));
        assert_eq!(rejected.terminal_count(), 1);
        assert_eq!(tap.streams(), 0);
        assert!(tap.fire_and_forget().is_empty());
        assert!(tap.metadata().is_empty());
        assert_eq!(pair.client.core.resume.sent_position(), 0);
        assert_eq!(pair.client.core.info().buffered_frames, 0);

        let stream = request(&mut pair, Interaction::Stream, 1);
        tap.emit(0, "fits");
        pair.run();
        assert_eq!(stream.items(), vec!["fits"]);
        assert!(!pair.client.core.is_closed());
    }

    #[test]
    fn oversized_item_fails_only_its_stream() {
        let (handler, tap) = ScriptedHandler::new(Script::Serve);
        let config = SessionConfig::builder().max_frame_length(128).build();
        let server = Peer::new(SessionRole::Server, config, Box::new(handler), Box::new(LoggingListener));
        let mut pair = Pair::with_peers(Peer::client(), server);
        pair.connect(resumable());

        let first = request(&mut pair, Interaction::Stream, 5);
        let second = request(&mut pair, Interaction::Stream, 5);
        let sent = pair.server.core.resume.sent_position();

        tap.emit(0, &"x".repeat(200));
        pair.run();
        assert!(matches!(first.error(), Some(StreamError::Invalid { .. })));
        assert!(first.items().is_empty());
        assert!(tap.canceled(0));
        assert_eq!(pair.server.core.resume.sent_position(), sent + 1);
        assert_eq!(pair.count_delivered(SessionRole::Server, |frame| matches!(frame, Frame::Payload { .. })), 0);

        tap.emit(1, "ok");
        pair.run();
        assert_eq!(second.items(), vec!["ok"]);
        assert!(!pair.server.core.is_closed());
        assert!(!pair.client.core.is_closed());
    }

    #[test]
    fn plain_session_closes_on_disconnect() {
        let (mut pair, _handler) = serving(SetupPayload::default());
        let stream = request(&mut pair, Interaction::Stream, 1);
        pair.disconnect();

        assert!(pair.client.core.is_closed());
        assert!(pair.server.core.is_closed());
        assert!(matches!(stream.error(), Some(StreamError::SessionClosed { .. })));

        let (outcome, mut receiver) = oneshot::channel();
        pair.client.core.begin_resume(outcome);
        assert_eq!(receiver.try_recv().unwrap(), Some(ResumeOutcome::Rejected(ResumeRejection::SessionClosed)));
    }

    #[test]
    fn shutdown_closes_both_sides() {
        let (mut pair, handler) = serving(SetupPayload::default());
        let stream = request(&mut pair, Interaction::Stream, 1);

        pair.client.core.shutdown();
        pair.run();
        assert!(pair.client.core.is_closed());
        assert!(pair.server.core.is_closed());
        assert!(handler.canceled(0));
        assert_eq!(stream.terminal_count(), 1);
        assert!(matches!(stream.error(), Some(StreamError::SessionClosed { .. })));
    }

    #[test]
    fn listener_sees_every_transition_once() {
        let mut listener = MockSessionListener::new();
        listener.expect_on_connected().times(2).return_const(());
        listener.expect_on_disconnected().times(1).return_const(());
        listener.expect_on_closed().withf(|_, reason| reason.contains("closed locally")).times(1).return_const(());
        listener.expect_on_frame_read().return_const(());
        listener.expect_on_frame_written().return_const(());

        let client = Peer::new(
            SessionRole::Client,
            SessionConfig::default(),
            Box::new(DefaultRequestHandler),
            Box::new(listener),
        );
        let (handler, _tap) = ScriptedHandler::new(Script::Serve);
        let mut pair = Pair::with_peers(client, Peer::server(handler));

        pair.connect(resumable());
        pair.disconnect();
        assert_eq!(pair.resume(), Some(ResumeOutcome::Resumed));
        pair.client.core.shutdown();
        pair.client.core.shutdown();
    }

    #[test]
    fn listener_counts_frames_crossing_the_transport() {
        let mut listener = MockSessionListener::new();
        listener.expect_on_connected().times(1).return_const(());
        listener.expect_on_frame_written().withf(|frame_type| *frame_type == FrameType::Setup).times(1).return_const(());
        listener.expect_on_frame_written().withf(|frame_type| *frame_type == FrameType::RequestFnf).times(2).return_const(());
        listener.expect_on_frame_read().never();

        let client = Peer::new(SessionRole::Client, SessionConfig::default(), Box::new(DefaultRequestHandler), Box::new(listener));
        let (handler, tap) = ScriptedHandler::new(Script::Serve);
        let mut pair = Pair::with_peers(client, Peer::server(handler));
        pair.connect(SetupPayload::default());
        pair.client.command(EngineCommand::FireAndForget(Payload::from("one")));
        pair.client.command(EngineCommand::FireAndForget(Payload::from("two")));
        pair.run();

        assert_eq!(tap.fire_and_forget(), vec!["one", "two"]);
        let client = pair.client.core.info();
        assert_eq!((client.frames_written, client.frames_read), (3, 0));
        let server = pair.server.core.info();
        assert_eq!((server.frames_written, server.frames_read), (0, 3));
    }
}
