//! TCP transport for `micro-rsocket` sessions.
//!
//! - [`Server`] listens on an address and hands every accepted connection to a
//!   [`SessionAcceptor`](micro_rsocket::connection::SessionAcceptor)
//! - [`connect`] and [`resume`] dial a server for a client [`Session`](micro_rsocket::session::Session)
//!
//! Both sides frame envelopes with the length-prefixed codec of `micro_rsocket::codec`.

mod client;
mod server;

pub use client::{ClientError, TcpConnection, connect, dial, resume};
pub use server::{Server, ServerBuildError, ServerBuilder, serve};
