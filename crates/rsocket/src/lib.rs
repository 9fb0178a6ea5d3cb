//! An asynchronous reactive-streams session engine with resumption
//!
//! This crate runs a multiplexed, bidirectional request protocol over a single duplex
//! connection. Either peer may originate requests using four interaction models, with
//! credit-based backpressure on every stream:
//!
//! - fire-and-forget
//! - request/response
//! - request/stream (and request/subscription, its never-ending variant)
//! - request/channel, items flowing both ways
//!
//! plus out-of-band metadata pushes.
//!
//! Sessions can be **resumed**: when a transport is lost, a new one can take over the same
//! logical session. Both sides keep the frames the other has not acknowledged and replay them,
//! so streams continue without losing or duplicating items.
//!
//! # Example
//!
//! ```no_run
//! use micro_rsocket::connection::FrameConnection;
//! use micro_rsocket::frame::{Payload, SetupPayload};
//! use micro_rsocket::handler::{Subscriber, Subscription};
//! use micro_rsocket::protocol::StreamError;
//! use micro_rsocket::resume::ResumeToken;
//! use micro_rsocket::session::Session;
//! use tokio::net::TcpStream;
//! use tracing::info;
//!
//! struct Print;
//!
//! impl Subscriber for Print {
//!     fn on_subscribe(&mut self, mut subscription: Box<dyn Subscription>) {
//!         subscription.request(16);
//!     }
//!
//!     fn on_next(&mut self, payload: Payload) {
//!         info!(data = ?payload.data(), "received item");
//!     }
//!
//!     fn on_complete(&mut self) {}
//!
//!     fn on_error(&mut self, error: StreamError) {
//!         info!(cause = %error, "stream failed");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::builder().build();
//!
//!     let (reader, writer) = TcpStream::connect("127.0.0.1:7878").await?.into_split();
//!     let setup = SetupPayload::builder().resume_token(ResumeToken::generate()).build();
//!     session.connect(FrameConnection::new(reader, writer), setup).await?;
//!
//!     session.request_stream(Payload::from("ticks"), Print)?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`frame`]: the protocol frames and the envelope a transport carries
//! - [`codec`]: a length-prefixed binary codec for frames
//! - [`stream`]: per-stream state machines, credit accounting and stream id allocation
//! - [`resume`]: position tracking, the replay buffer and resume tokens
//! - [`session`]: the session facade, its configuration and lifecycle notifications
//! - [`connection`]: transports, the session driver task and the server-side acceptor
//! - [`handler`]: the request handler trait and the reactive-streams signals
//! - [`protocol`]: error types
//!
//! The engine core is sans-io: it consumes envelopes and commands and produces envelopes. One
//! tokio task per session owns it and the current transport, so all session state is touched
//! from a single context without locks.

pub mod codec;
pub mod connection;
pub mod frame;
pub mod handler;
pub mod protocol;
pub mod resume;
pub mod session;
pub mod stream;

mod utils;
pub(crate) use utils::ensure;

#[cfg(test)]
mod testing;
