//! Plain TCP transport using `tokio::net`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::{ConnectionId, Transport, TransportError};

/// A TCP [`Transport`] that listens for incoming connections.
pub struct TcpTransport {
    listener: TcpListener,
    /// Counter for connection ids, scoped to this listener.
    next_id: AtomicU64,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    ///
    /// Pass port `0` to let the OS pick a free port; read it back with
    /// [`Transport::local_addr`].
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            TransportError::BindFailed {
                addr: addr.to_string(),
                source,
            }
        })?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self {
            listener,
            next_id: AtomicU64::new(1),
        })
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer_addr, error = %e, "failed to set TCP_NODELAY");
        }

        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %peer_addr, "accepted TCP connection");

        Ok(TcpConnection {
            id,
            peer_addr,
            stream,
        })
    }

    fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
        self.listener
            .local_addr()
            .map_err(TransportError::AddressUnavailable)
    }

    fn shutdown(self) {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!(%addr, "TCP transport closed"),
            Err(_) => tracing::info!("TCP transport closed"),
        }
        // Dropping the listener closes the socket.
    }
}

/// A single accepted TCP connection, not yet split for reading/writing.
#[derive(Debug)]
pub struct TcpConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    stream: TcpStream,
}

impl TcpConnection {
    /// Wraps an already-connected stream.
    ///
    /// # Errors
    /// Returns [`TransportError::AddressUnavailable`] if the peer address
    /// can't be read (the socket is already disconnected).
    pub fn from_stream(
        id: ConnectionId,
        stream: TcpStream,
    ) -> Result<Self, TransportError> {
        let peer_addr = stream
            .peer_addr()
            .map_err(TransportError::AddressUnavailable)?;
        Ok(Self {
            id,
            peer_addr,
            stream,
        })
    }

    /// Returns the unique identifier for this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the remote peer's address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Splits the connection into independently owned read and write halves.
    ///
    /// The socket is closed once both halves are dropped.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}
