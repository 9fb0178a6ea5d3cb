use std::io;
use std::net::SocketAddr;

use micro_rsocket::connection::{FrameConnection, SessionAcceptor};
use thiserror::Error;
use tokio::net::{TcpListener, ToSocketAddrs, lookup_host};
use tracing::{error, info, warn};

#[derive(Debug, Default)]
pub struct ServerBuilder {
    acceptor: Option<SessionAcceptor>,
    address: Option<String>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self::default()
    }

    /// Where to listen, e.g. `"127.0.0.1:7878"`. Resolved when the server is built.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Turns accepted connections into sessions. Defaults to an acceptor that rejects every request.
    pub fn acceptor(mut self, acceptor: SessionAcceptor) -> Self {
        self.acceptor = Some(acceptor);
        self
    }

    pub async fn build(self) -> Result<Server, ServerBuildError> {
        let address = self.address.ok_or(ServerBuildError::MissingAddress)?;
        let resolved = resolve(address.as_str()).await;
        let resolved = resolved.map_err(|source| ServerBuildError::InvalidAddress { address, source })?;
        Ok(Server { acceptor: self.acceptor.unwrap_or_else(|| SessionAcceptor::builder().build()), address: resolved })
    }
}

async fn resolve(address: impl ToSocketAddrs) -> io::Result<Vec<SocketAddr>> {
    Ok(lookup_host(address).await?.collect())
}

/// A TCP server feeding every accepted connection to a [`SessionAcceptor`].
#[derive(Debug)]
pub struct Server {
    acceptor: SessionAcceptor,
    address: Vec<SocketAddr>,
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("address must be set")]
    MissingAddress,

    #[error("invalid address {address}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: io::Error,
    },
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Binds the address and serves until the task is dropped.
    pub async fn start(self) -> io::Result<()> {
        info!("start listening at {:?}", self.address);
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return Err(e);
            }
        };

        serve(tcp_listener, self.acceptor).await;
        Ok(())
    }
}

/// Accepts connections from `tcp_listener` forever, each handshake on its own task.
///
/// Useful when the listener is bound elsewhere, for instance on port 0.
pub async fn serve(tcp_listener: TcpListener, acceptor: SessionAcceptor) {
    loop {
        let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
            Ok(stream_and_addr) => stream_and_addr,
            Err(e) => {
                warn!(cause = %e, "failed to accept");
                continue;
            }
        };

        let acceptor = acceptor.clone();

        tokio::spawn(async move {
            if let Err(e) = tcp_stream.set_nodelay(true) {
                warn!(%remote_addr, cause = %e, "failed to set TCP_NODELAY");
            }
            let (reader, writer) = tcp_stream.into_split();
            match acceptor.accept(FrameConnection::new(reader, writer)).await {
                Ok(_session) => info!(%remote_addr, "session established"),
                Err(e) => warn!(%remote_addr, cause = %e, "connection refused"),
            }
        });
    }
}
