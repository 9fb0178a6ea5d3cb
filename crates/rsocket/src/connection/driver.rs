use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::select;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep};
use tracing::{debug, error, info, warn};

use crate::connection::BoxConnection;
use crate::frame::Envelope;
use crate::protocol::{ProtocolError, SessionError};
use crate::protocol::StreamError;
use crate::session::{ConnectionState, SessionCore, SessionRole};
use crate::session::command::{Command, CommandReceiver};

struct Keepalive {
    timer: Interval,
    max_lifetime: Duration,
}

enum Event {
    Command(Option<Command>),
    Inbound(Option<Result<Envelope, ProtocolError>>),
    Tick,
    ResumeWindowElapsed,
}

/// The task behind a session.
///
/// Owns the core and at most one transport, and applies commands, inbound envelopes and
/// keepalive ticks one at a time. After every step the core's outbound queue is written out.
pub(crate) struct SessionDriver {
    core: SessionCore,
    commands: CommandReceiver,
    connection: Option<BoxConnection>,
    keepalive: Option<Keepalive>,
    last_received: Instant,
    resume_deadline: Option<Pin<Box<Sleep>>>,
}

impl SessionDriver {
    pub(crate) fn new(core: SessionCore, commands: CommandReceiver) -> Self {
        Self { core, commands, connection: None, keepalive: None, last_received: Instant::now(), resume_deadline: None }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let event = select! {
                command = self.commands.next() => Event::Command(command),
                inbound = next_inbound(&mut self.connection) => Event::Inbound(inbound),
                () = next_tick(&mut self.keepalive) => Event::Tick,
                () = deadline(&mut self.resume_deadline) => Event::ResumeWindowElapsed,
            };

            match event {
                Event::Command(Some(command)) => self.handle_command(command),
                Event::Command(None) => self.core.shutdown(),
                Event::Inbound(Some(Ok(envelope))) => {
                    self.last_received = Instant::now();
                    self.core.handle_envelope(envelope);
                }
                Event::Inbound(Some(Err(e))) => {
                    warn!(cause = %e, "failed to read from transport");
                    self.lose_transport(&e.to_string());
                }
                Event::Inbound(None) => {
                    info!("transport closed by peer");
                    self.lose_transport("transport closed by peer");
                }
                Event::Tick => self.on_tick(),
                Event::ResumeWindowElapsed => {
                    info!("no resume within the resume window");
                    self.core.close(StreamError::session_closed("resume window elapsed"));
                }
            }

            self.flush().await;
            self.watch_resume_window();
            if self.core.is_closed() {
                break;
            }
        }
        debug!("session driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Engine(command) => self.core.handle_command(command),
            Command::Connect { connection, setup, reply } => {
                let result = self.install(connection).and_then(|()| self.core.connect(setup));
                if result.is_ok() {
                    self.arm_keepalive();
                }
                let _ = reply.send(result);
            }
            Command::AcceptSetup { connection, setup, reply } => {
                let result = self.install(connection).and_then(|()| self.core.accept_setup(setup));
                if result.is_ok() {
                    self.arm_keepalive();
                }
                let _ = reply.send(result);
            }
            Command::Disconnect => {
                info!("disconnecting on request");
                self.core.detach("disconnected locally");
            }
            Command::Resume { connection, outcome } => {
                if self.connection.take().is_some() {
                    self.core.detach("replaced by a new transport");
                }
                self.connection = Some(connection);
                self.core.begin_resume(outcome);
                self.last_received = Instant::now();
            }
            Command::ResumeFromPeer { connection, token, last_received_server_position, first_available_client_position } => {
                info!(%token, last_received_server_position, first_available_client_position, "peer resuming session");
                self.connection = Some(connection);
                if self.core.resume_from_peer(last_received_server_position, first_available_client_position) {
                    self.arm_keepalive();
                }
            }
            Command::Info(reply) => {
                let _ = reply.send(self.core.info());
            }
            Command::Close => self.core.shutdown(),
        }
    }

    /// Takes a transport for a fresh handshake.
    fn install(&mut self, connection: BoxConnection) -> Result<(), SessionError> {
        match self.core.state() {
            ConnectionState::Idle if self.connection.is_none() => {
                self.connection = Some(connection);
                Ok(())
            }
            ConnectionState::Closed => Err(SessionError::Closed),
            _ => Err(SessionError::AlreadyConnected),
        }
    }

    fn lose_transport(&mut self, reason: &str) {
        self.connection = None;
        self.core.detach(reason);
    }

    fn arm_keepalive(&mut self) {
        self.last_received = Instant::now();
        if self.keepalive.is_some() {
            return;
        }
        let Some((interval, max_lifetime)) = self.core.keepalive() else { return };
        if interval.is_zero() {
            return;
        }
        let mut timer = interval_at(Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.keepalive = Some(Keepalive { timer, max_lifetime });
    }

    fn on_tick(&mut self) {
        if self.connection.is_none() {
            return;
        }
        let expired = self.keepalive.as_ref().is_some_and(|keepalive| self.last_received.elapsed() > keepalive.max_lifetime);
        if expired {
            warn!("no frame received within the keepalive max lifetime");
            self.lose_transport("keepalive timeout");
        } else {
            self.core.keepalive_tick();
        }
    }

    /// A disconnected server session only waits so long for its client to come back.
    fn watch_resume_window(&mut self) {
        let waiting = self.core.role() == SessionRole::Server && self.core.state() == ConnectionState::Disconnected;
        match (waiting, self.resume_deadline.is_some()) {
            (true, false) => self.resume_deadline = Some(Box::pin(sleep(self.core.resume_window()))),
            (false, true) => self.resume_deadline = None,
            _ => {}
        }
    }

    /// Writes everything the core queued, then lets go of the transport if the core detached.
    async fn flush(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            let mut written = 0usize;
            while let Some(envelope) = self.core.poll_outbound() {
                if let Err(e) = connection.feed(envelope).await {
                    error!(cause = %e, "failed to write to transport");
                    return self.lose_transport(&e.to_string());
                }
                written += 1;
            }
            if written > 0 {
                if let Err(e) = connection.flush().await {
                    error!(cause = %e, "failed to flush transport");
                    return self.lose_transport(&e.to_string());
                }
            }
        }

        if !self.core.is_attached() {
            if let Some(mut connection) = self.connection.take() {
                debug!("releasing transport");
                let _ = connection.close().await;
            }
        }
    }
}

async fn next_inbound(connection: &mut Option<BoxConnection>) -> Option<Result<Envelope, ProtocolError>> {
    match connection {
        Some(connection) => connection.next().await,
        None => pending().await,
    }
}

async fn next_tick(keepalive: &mut Option<Keepalive>) {
    match keepalive {
        Some(keepalive) => {
            keepalive.timer.tick().await;
        }
        None => pending().await,
    }
}

async fn deadline(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.await,
        None => pending().await,
    }
}
