use std::fmt;

use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use tracing::debug;

use crate::connection::BoxConnection;
use crate::frame::{Payload, SetupPayload};
use crate::handler::{StreamSlot, Subscriber, Subscription};
use crate::protocol::{SessionError, StreamError};
use crate::resume::ResumeToken;
use crate::session::{ResumeOutcome, SessionInfo};

/// Everything that reaches a session from outside the transport.
///
/// Application calls and engine handles enqueue these; the driver applies them one at a time
/// together with inbound frames, which is what keeps the core single-threaded.
pub(crate) enum Command {
    Engine(EngineCommand),
    Connect { connection: BoxConnection, setup: SetupPayload, reply: oneshot::Sender<Result<(), SessionError>> },
    AcceptSetup { connection: BoxConnection, setup: SetupPayload, reply: oneshot::Sender<Result<(), SessionError>> },
    Disconnect,
    Resume { connection: BoxConnection, outcome: oneshot::Sender<ResumeOutcome> },
    ResumeFromPeer { connection: BoxConnection, token: ResumeToken, last_received_server_position: u64, first_available_client_position: u64 },
    Info(oneshot::Sender<SessionInfo>),
    Close,
}

/// Commands the sans-io core applies directly.
pub(crate) enum EngineCommand {
    FireAndForget(Payload),
    RequestResponse { payload: Payload, subscriber: Box<dyn Subscriber> },
    RequestStream { payload: Payload, subscriber: Box<dyn Subscriber> },
    RequestSubscription { payload: Payload, subscriber: Box<dyn Subscriber> },
    RequestChannel { payload: Payload, subscriber: Box<dyn Subscriber>, slot: StreamSlot },
    MetadataPush(Bytes),
    Signal { slot: StreamSlot, signal: Signal },
}

/// A reactive-streams signal raised by a local consumer or producer of one stream.
pub(crate) enum Signal {
    /// Consumer side: more credit for the peer.
    Request(u32),
    /// Consumer side: stop the inbound flow.
    Cancel,
    /// Producer side: the local producer became available.
    Subscribe(Box<dyn Subscription>),
    Next(Payload),
    Complete,
    Error(StreamError),
}

impl Signal {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Signal::Request(_) => "request",
            Signal::Cancel => "cancel",
            Signal::Subscribe(_) => "subscribe",
            Signal::Next(_) => "next",
            Signal::Complete => "complete",
            Signal::Error(_) => "error",
        }
    }
}

#[derive(Clone)]
pub(crate) struct CommandSender {
    sender: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSender").field("closed", &self.sender.is_closed()).finish()
    }
}

pub(crate) type CommandReceiver = mpsc::UnboundedReceiver<Command>;

pub(crate) fn channel() -> (CommandSender, CommandReceiver) {
    let (sender, receiver) = mpsc::unbounded();
    (CommandSender { sender }, receiver)
}

impl CommandSender {
    pub(crate) fn send(&self, command: Command) -> Result<(), SessionError> {
        self.sender.unbounded_send(command).map_err(|_e| SessionError::Closed)
    }

    pub(crate) fn engine(&self, command: EngineCommand) -> Result<(), SessionError> {
        self.send(Command::Engine(command))
    }

    /// Sends a stream signal, dropping it when the session is already gone.
    ///
    /// A producer subscribing to a dead session is canceled right away.
    pub(crate) fn signal(&self, slot: &StreamSlot, signal: Signal) {
        let name = signal.name();
        let command = Command::Engine(EngineCommand::Signal { slot: slot.clone(), signal });
        if let Err(e) = self.sender.unbounded_send(command) {
            debug!(signal = name, "session is gone, dropping stream signal");
            if let Command::Engine(EngineCommand::Signal { signal: Signal::Subscribe(mut subscription), .. }) = e.into_inner() {
                subscription.cancel();
            }
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
