//! Transports and the tasks that drive sessions over them.
//!
//! # Components
//!
//! - [`DuplexConnection`]: what the engine needs from a transport, a stream of inbound
//!   [`Envelope`]s and a sink for outbound ones
//! - [`FrameConnection`]: a [`DuplexConnection`] over any `AsyncRead`/`AsyncWrite` pair using the
//!   reference codec
//! - the session driver: the task owning a session core and its current transport
//! - [`SessionAcceptor`]: server-side entry point routing new transports to new or resumed
//!   sessions

mod acceptor;
pub(crate) mod driver;
mod frame_connection;

pub use acceptor::{ResumeStore, SessionAcceptor, SessionAcceptorBuilder};
pub use frame_connection::FrameConnection;

use futures::{Sink, Stream};

use crate::frame::Envelope;
use crate::protocol::ProtocolError;

/// A transport carrying envelopes in both directions.
///
/// Blanket-implemented for every matching `Stream` + `Sink`.
pub trait DuplexConnection:
    Stream<Item = Result<Envelope, ProtocolError>> + Sink<Envelope, Error = ProtocolError> + Send + Unpin
{
}

impl<T> DuplexConnection for T where
    T: Stream<Item = Result<Envelope, ProtocolError>> + Sink<Envelope, Error = ProtocolError> + Send + Unpin
{
}

pub(crate) type BoxConnection = Box<dyn DuplexConnection>;
