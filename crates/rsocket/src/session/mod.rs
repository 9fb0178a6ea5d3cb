//! Sessions: the application-facing facade over one logical connection.
//!
//! A [`Session`] is a cheap handle to a session driven by its own tokio task. Clients build one
//! with [`Session::builder`], attach a transport with [`Session::connect`] and issue requests;
//! servers get theirs from a [`SessionAcceptor`](crate::connection::SessionAcceptor). A resumable
//! session survives the loss of its transport: [`Session::resume`] attaches a new one and replays
//! whatever the peer missed.
//!
//! Dropping the last handle of a client session closes it. Server sessions live until their
//! transport goes away (or, when resumable, until the resume window passes) or until closed.

pub(crate) mod command;
mod config;
mod engine;
mod dispatch;
mod listener;
mod outcome;

pub use config::{ReplayConfig, SessionConfig, SessionConfigBuilder};
pub(crate) use engine::{ConnectionState, SessionCore};
pub use listener::{Lease, LoggingListener, SessionInfo, SessionListener, SessionRole};
#[cfg(test)]
pub(crate) use listener::MockSessionListener;
pub use outcome::{ResumeHandle, ResumeOutcome, ResumeRejection};

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::channel::oneshot;
use tokio::runtime::Handle;

use crate::connection::DuplexConnection;
use crate::connection::driver::SessionDriver;
use crate::ensure;
use crate::frame::{Frame, Payload, SetupPayload, StreamId};
use crate::handler::{DefaultRequestHandler, OffloadedSubscriber, RequestHandler, StreamSink, StreamSlot, Subscriber};
use crate::protocol::SessionError;
use crate::resume::ResumeToken;
use command::{Command, CommandSender, EngineCommand};

struct SessionInner {
    commands: CommandSender,
    role: SessionRole,
    max_frame_length: usize,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if self.role == SessionRole::Client {
            let _ = self.commands.send(Command::Close);
        }
    }
}

/// Handle to a running session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("role", &self.inner.role).field("closed", &self.is_closed()).finish()
    }
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Spawns the driver task of a new session on the current tokio runtime.
    pub(crate) fn spawn(
        role: SessionRole,
        config: SessionConfig,
        handler: Box<dyn RequestHandler>,
        listener: Box<dyn SessionListener>,
    ) -> Self {
        let (commands, receiver) = command::channel();
        let max_frame_length = config.max_frame_length();
        let core = SessionCore::new(role, config, handler, listener, commands.clone());
        tokio::spawn(SessionDriver::new(core, receiver).run());
        Self { inner: Arc::new(SessionInner { commands, role, max_frame_length }) }
    }

    pub fn role(&self) -> SessionRole {
        self.inner.role
    }

    /// Whether the session ended. A closed session rejects every call.
    pub fn is_closed(&self) -> bool {
        self.inner.commands.is_closed()
    }

    /// Attaches the first transport and sends SETUP. Requests issued before are sent right after.
    pub async fn connect<C: DuplexConnection + 'static>(&self, connection: C, setup: SetupPayload) -> Result<(), SessionError> {
        let (reply, result) = oneshot::channel();
        self.send(Command::Connect { connection: Box::new(connection), setup, reply })?;
        result.await.unwrap_or(Err(SessionError::Closed))
    }

    pub(crate) async fn accept_setup<C: DuplexConnection + 'static>(&self, connection: C, setup: SetupPayload) -> Result<(), SessionError> {
        let (reply, result) = oneshot::channel();
        self.send(Command::AcceptSetup { connection: Box::new(connection), setup, reply })?;
        result.await.unwrap_or(Err(SessionError::Closed))
    }

    /// Drops the transport. A resumable session keeps its streams and can [`resume`](Self::resume)
    /// later; any other session closes.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.send(Command::Disconnect)
    }

    /// Attaches a new transport to a disconnected resumable session.
    ///
    /// Any transport still attached is dropped first.
    pub fn resume<C: DuplexConnection + 'static>(&self, connection: C) -> ResumeHandle {
        let (outcome, receiver) = oneshot::channel();
        let _ = self.send(Command::Resume { connection: Box::new(connection), outcome });
        ResumeHandle::new(receiver)
    }

    pub(crate) fn resume_from_peer<C: DuplexConnection + 'static>(
        &self,
        connection: C,
        token: ResumeToken,
        last_received_server_position: u64,
        first_available_client_position: u64,
    ) -> Result<(), SessionError> {
        self.send(Command::ResumeFromPeer {
            connection: Box::new(connection),
            token,
            last_received_server_position,
            first_available_client_position,
        })
    }

    /// Closes the session, failing every live stream. The peer is told if a transport is attached.
    pub fn close(&self) {
        let _ = self.send(Command::Close);
    }

    pub async fn info(&self) -> Result<SessionInfo, SessionError> {
        let (reply, info) = oneshot::channel();
        self.send(Command::Info(reply))?;
        info.await.map_err(|_canceled| SessionError::Closed)
    }

    /// Fails with [`SessionError::FrameTooLarge`] when the request cannot fit in one frame.
    pub fn fire_and_forget(&self, payload: Payload) -> Result<(), SessionError> {
        self.check_frame_length(&Frame::RequestFnf { stream_id: StreamId::CONNECTION, payload: payload.clone() })?;
        self.engine(EngineCommand::FireAndForget(payload))
    }

    pub fn metadata_push(&self, metadata: Bytes) -> Result<(), SessionError> {
        self.check_frame_length(&Frame::MetadataPush { metadata: metadata.clone() })?;
        self.engine(EngineCommand::MetadataPush(metadata))
    }

    /// Opens a request/response stream. The request goes out on the subscriber's first `request(n)`.
    pub fn request_response<S: Subscriber + 'static>(&self, payload: Payload, subscriber: S) -> Result<(), SessionError> {
        self.engine(EngineCommand::RequestResponse { payload, subscriber: Box::new(subscriber) })
    }

    /// Opens a request/stream; the first `request(n)` sends the request with `n` as initial credit.
    pub fn request_stream<S: Subscriber + 'static>(&self, payload: Payload, subscriber: S) -> Result<(), SessionError> {
        self.engine(EngineCommand::RequestStream { payload, subscriber: Box::new(subscriber) })
    }

    pub fn request_subscription<S: Subscriber + 'static>(&self, payload: Payload, subscriber: S) -> Result<(), SessionError> {
        self.engine(EngineCommand::RequestSubscription { payload, subscriber: Box::new(subscriber) })
    }

    /// Opens a request/channel.
    ///
    /// `subscriber` consumes the responder's items. The returned sink is where the local producer
    /// subscribes and emits; it may emit once the responder granted credit through `request(n)`.
    pub fn request_channel<S: Subscriber + 'static>(&self, payload: Payload, subscriber: S) -> Result<StreamSink, SessionError> {
        self.open_channel(payload, Box::new(subscriber), None)
    }

    pub fn request_response_on<S: Subscriber + 'static>(&self, payload: Payload, subscriber: S, handle: &Handle) -> Result<(), SessionError> {
        self.request_response(payload, OffloadedSubscriber::spawn(handle, subscriber))
    }

    pub fn request_stream_on<S: Subscriber + 'static>(&self, payload: Payload, subscriber: S, handle: &Handle) -> Result<(), SessionError> {
        self.request_stream(payload, OffloadedSubscriber::spawn(handle, subscriber))
    }

    pub fn request_subscription_on<S: Subscriber + 'static>(
        &self,
        payload: Payload,
        subscriber: S,
        handle: &Handle,
    ) -> Result<(), SessionError> {
        self.request_subscription(payload, OffloadedSubscriber::spawn(handle, subscriber))
    }

    /// Like [`request_channel`](Self::request_channel), with both the consumer and the producer's
    /// subscription running on `handle`.
    pub fn request_channel_on<S: Subscriber + 'static>(&self, payload: Payload, subscriber: S, handle: &Handle) -> Result<StreamSink, SessionError> {
        let subscriber = OffloadedSubscriber::spawn(handle, subscriber);
        self.open_channel(payload, Box::new(subscriber), Some(handle.clone()))
    }

    fn open_channel(&self, payload: Payload, subscriber: Box<dyn Subscriber>, executor: Option<Handle>) -> Result<StreamSink, SessionError> {
        let slot = StreamSlot::unbound();
        self.engine(EngineCommand::RequestChannel { payload, subscriber, slot: slot.clone() })?;
        Ok(StreamSink::new(slot, self.inner.commands.clone(), executor))
    }

    fn check_frame_length(&self, frame: &Frame) -> Result<(), SessionError> {
        let (size, max) = (frame.size_hint(), self.inner.max_frame_length);
        ensure!(size <= max, SessionError::FrameTooLarge { size, max });
        Ok(())
    }

    fn engine(&self, command: EngineCommand) -> Result<(), SessionError> {
        self.inner.commands.engine(command)
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.inner.commands.send(command)
    }
}

/// Builds client sessions.
#[derive(Default)]
pub struct SessionBuilder {
    handler: Option<Box<dyn RequestHandler>>,
    listener: Option<Box<dyn SessionListener>>,
    config: SessionConfig,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("handler", &self.handler.is_some())
            .field("listener", &self.listener.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl SessionBuilder {
    /// Handler for requests the server sends to this client. Defaults to rejecting them all.
    pub fn handler<H: RequestHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn listener<L: SessionListener + 'static>(mut self, listener: L) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts the client session, not yet connected.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn build(self) -> Session {
        Session::spawn(
            SessionRole::Client,
            self.config,
            self.handler.unwrap_or_else(|| Box::new(DefaultRequestHandler)),
            self.listener.unwrap_or_else(|| Box::new(LoggingListener)),
        )
    }
}
