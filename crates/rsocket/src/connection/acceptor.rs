use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{SinkExt, StreamExt};
use tracing::{info, warn};

use crate::connection::DuplexConnection;
use crate::frame::{Envelope, ErrorCode, Frame, SetupPayload, StreamId};
use crate::handler::{DefaultRequestHandler, RequestHandler};
use crate::protocol::SessionError;
use crate::resume::ResumeToken;
use crate::session::{LoggingListener, Session, SessionConfig, SessionInfo, SessionListener, SessionRole};

type HandlerFactory = dyn Fn(&SetupPayload) -> Box<dyn RequestHandler> + Send + Sync;
type ListenerFactory = dyn Fn() -> Box<dyn SessionListener> + Send + Sync;

/// Resumable server sessions by token.
///
/// Sessions leave the store when they close.
#[derive(Clone, Default)]
pub struct ResumeStore {
    sessions: Arc<Mutex<HashMap<ResumeToken, Session>>>,
}

impl fmt::Debug for ResumeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumeStore").field("sessions", &self.len()).finish()
    }
}

impl ResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &ResumeToken) -> Option<Session> {
        self.lock().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn insert(&self, token: ResumeToken, session: Session) {
        self.lock().insert(token, session);
    }

    fn remove(&self, token: &ResumeToken) -> Option<Session> {
        self.lock().remove(token)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResumeToken, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a closed session from the store, then forwards to the application's listener.
struct StoreEviction {
    store: ResumeStore,
    token: ResumeToken,
    inner: Box<dyn SessionListener>,
}

impl SessionListener for StoreEviction {
    fn on_connected(&mut self, info: &SessionInfo) {
        self.inner.on_connected(info);
    }

    fn on_disconnected(&mut self, info: &SessionInfo) {
        self.inner.on_disconnected(info);
    }

    fn on_closed(&mut self, info: &SessionInfo, reason: &str) {
        // dropped outside the lock, the handle's drop enqueues a close command
        let evicted = self.store.remove(&self.token);
        drop(evicted);
        self.inner.on_closed(info, reason);
    }
}

/// Server-side entry point: turns accepted transports into sessions.
///
/// The first envelope of a transport decides: SETUP starts a new session, RESUME hands the
/// transport to the stored session with that token, anything else is refused.
#[derive(Clone)]
pub struct SessionAcceptor {
    handler_factory: Arc<HandlerFactory>,
    listener_factory: Option<Arc<ListenerFactory>>,
    config: SessionConfig,
    store: ResumeStore,
}

impl fmt::Debug for SessionAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAcceptor").field("config", &self.config).field("store", &self.store).finish()
    }
}

impl SessionAcceptor {
    pub fn builder() -> SessionAcceptorBuilder {
        SessionAcceptorBuilder::default()
    }

    pub fn store(&self) -> &ResumeStore {
        &self.store
    }

    /// Reads the first envelope of `connection` and routes the transport accordingly.
    pub async fn accept<C: DuplexConnection + 'static>(&self, mut connection: C) -> Result<Session, SessionError> {
        let first = match connection.next().await {
            Some(Ok(envelope)) => envelope,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(SessionError::Closed),
        };

        match first.frame {
            Frame::Setup(setup) => self.accept_setup(connection, setup).await,
            Frame::Resume { token, last_received_server_position, first_available_client_position } => {
                let Some(session) = self.store.get(&token) else {
                    warn!(%token, "resume for an unknown session");
                    refuse(&mut connection, ErrorCode::RejectedResume, "unknown resume token").await;
                    return Err(SessionError::NotResumable);
                };
                info!(%token, "routing resume to stored session");
                session.resume_from_peer(connection, token, last_received_server_position, first_available_client_position)?;
                Ok(session)
            }
            other => {
                let error = SessionError::invalid_setup(format!("expected SETUP or RESUME, got {:?}", other.frame_type()));
                warn!(cause = %error, "refusing connection");
                refuse(&mut connection, error.code(), &error.to_string()).await;
                Err(error)
            }
        }
    }

    async fn accept_setup<C: DuplexConnection + 'static>(&self, connection: C, setup: SetupPayload) -> Result<Session, SessionError> {
        let handler = (self.handler_factory)(&setup);
        let listener = self.listener_factory.as_ref().map_or_else(|| Box::new(LoggingListener) as Box<dyn SessionListener>, |factory| factory());
        let token = setup.token().cloned();

        let listener: Box<dyn SessionListener> = match &token {
            Some(token) => Box::new(StoreEviction { store: self.store.clone(), token: token.clone(), inner: listener }),
            None => listener,
        };
        let session = Session::spawn(SessionRole::Server, self.config.clone(), handler, listener);
        if let Some(token) = token {
            self.store.insert(token, session.clone());
        }

        session.accept_setup(connection, setup).await?;
        Ok(session)
    }
}

async fn refuse<C: DuplexConnection>(connection: &mut C, code: ErrorCode, message: &str) {
    let error = Envelope::unsequenced(Frame::error(StreamId::CONNECTION, code, message));
    if let Err(e) = connection.send(error).await {
        warn!(cause = %e, "failed to send refusal");
    }
}

pub struct SessionAcceptorBuilder {
    handler_factory: Arc<HandlerFactory>,
    listener_factory: Option<Arc<ListenerFactory>>,
    config: SessionConfig,
    store: ResumeStore,
}

impl Default for SessionAcceptorBuilder {
    fn default() -> Self {
        Self {
            handler_factory: Arc::new(|_setup: &SetupPayload| Box::new(DefaultRequestHandler) as Box<dyn RequestHandler>),
            listener_factory: None,
            config: SessionConfig::default(),
            store: ResumeStore::new(),
        }
    }
}

impl fmt::Debug for SessionAcceptorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAcceptorBuilder").field("config", &self.config).finish_non_exhaustive()
    }
}

impl SessionAcceptorBuilder {
    /// Creates the request handler of each new session from its SETUP.
    pub fn handler_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&SetupPayload) -> Box<dyn RequestHandler> + Send + Sync + 'static,
    {
        self.handler_factory = Arc::new(factory);
        self
    }

    pub fn listener_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn SessionListener> + Send + Sync + 'static,
    {
        self.listener_factory = Some(Arc::new(factory));
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares a store between acceptors, e.g. one per listening address.
    pub fn store(mut self, store: ResumeStore) -> Self {
        self.store = store;
        self
    }

    pub fn build(self) -> SessionAcceptor {
        SessionAcceptor {
            handler_factory: self.handler_factory,
            listener_factory: self.listener_factory,
            config: self.config,
            store: self.store,
        }
    }
}
