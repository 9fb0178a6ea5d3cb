use std::io;

use micro_rsocket::connection::FrameConnection;
use micro_rsocket::frame::SetupPayload;
use micro_rsocket::protocol::SessionError;
use micro_rsocket::session::{ResumeOutcome, Session};
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

/// Envelope connection over a TCP stream.
pub type TcpConnection = FrameConnection<OwnedReadHalf, OwnedWriteHalf>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to reach the server: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Opens a TCP connection to `address`.
pub async fn dial<A: ToSocketAddrs>(address: A) -> io::Result<TcpConnection> {
    let tcp_stream = TcpStream::connect(address).await?;
    tcp_stream.set_nodelay(true)?;
    debug!(peer = ?tcp_stream.peer_addr().ok(), "tcp connection established");
    let (reader, writer) = tcp_stream.into_split();
    Ok(FrameConnection::new(reader, writer))
}

/// Dials `address` and performs the SETUP handshake of `session` over it.
pub async fn connect<A: ToSocketAddrs>(address: A, session: &Session, setup: SetupPayload) -> Result<(), ClientError> {
    let resumable = setup.is_resumable();
    let connection = dial(address).await?;
    session.connect(connection, setup).await?;
    info!(resumable, "connected over tcp");
    Ok(())
}

/// Dials `address` again and resumes `session` over the new connection.
///
/// A failure to reach the server is reported as an error; anything that happens once connected
/// is part of the [`ResumeOutcome`].
pub async fn resume<A: ToSocketAddrs>(address: A, session: &Session) -> Result<ResumeOutcome, ClientError> {
    let connection = dial(address).await?;
    let outcome = session.resume(connection).await;
    info!(resumed = outcome.is_resumed(), "resume over tcp finished");
    Ok(outcome)
}
