//! Client sessions: one per live connection.
//!
//! A session moves through a small state machine:
//!
//! ```text
//!   Connecting ──(reader attached)──→ Authenticating ──(identity)──→ Active
//!                                                                      │
//!                              (read error / owner request / close)    │
//!                                                                      ▼
//!                                                                Disconnected
//! ```
//!
//! [`PendingSession`] covers the first two states and belongs to the build
//! pipeline. [`PendingSession::activate`] turns it into a shared
//! [`ClientSession`] and starts its read loop.
//!
//! # Routing pointers
//!
//! An active session caches where its events go: the action channels of
//! its current server and community, plus their ids. The pair lives in a
//! single [`Route`] behind one `RwLock`, so a migration swaps both at once
//! and the read loop can never observe one old pointer and one new one.
//! These are non-owning: membership is decided by the community's member
//! map, never by the route.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chatrelay_protocol::{DecodeError, Message, SessionId, WireCodec};
use chatrelay_transport::{ConnectionId, TcpConnection};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;

use crate::{Action, ActionSender, CommunityId, Identity, ServerId, SessionError};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket accepted, nothing attached yet.
    Connecting,
    /// Buffered reader attached; waiting for an identity.
    Authenticating,
    /// Identity assigned; the read loop dispatches decoded messages.
    Active,
    /// Connection closed. Terminal.
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "Connecting",
            Self::Authenticating => "Authenticating",
            Self::Active => "Active",
            Self::Disconnected => "Disconnected",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// Where an active session's events are sent.
///
/// `server_id`/`community_id` are denormalized copies of the owners'
/// ids, used by the read loop and by the server when it needs to know
/// which community currently holds the session.
#[derive(Debug, Clone)]
pub struct Route {
    pub server_id: ServerId,
    pub server: ActionSender,
    pub community_id: CommunityId,
    pub community: ActionSender,
}

// ---------------------------------------------------------------------------
// PendingSession
// ---------------------------------------------------------------------------

/// A connection that has been accepted but not yet given an identity.
///
/// Owned solely by the build pipeline. Dropping it closes the connection.
pub struct PendingSession {
    conn_id: ConnectionId,
    peer_addr: SocketAddr,
    state: SessionState,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    codec: Arc<WireCodec>,
}

impl PendingSession {
    /// Attaches a buffered reader to `conn` and enters `Authenticating`.
    pub fn new(conn: TcpConnection, codec: Arc<WireCodec>) -> Self {
        let conn_id = conn.id();
        let peer_addr = conn.peer_addr();
        let (read_half, writer) = conn.into_split();
        let mut pending = Self {
            conn_id,
            peer_addr,
            state: SessionState::Connecting,
            reader: BufReader::new(read_half),
            writer,
            codec,
        };
        pending.state = SessionState::Authenticating;
        tracing::debug!(%conn_id, %peer_addr, "session authenticating");
        pending
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Reads one message during the handshake.
    pub async fn read_message(&mut self) -> Result<Message, SessionError> {
        Ok(self.codec.read_frame(&mut self.reader).await?)
    }

    /// Writes one message during the handshake.
    pub async fn write_message(&mut self, message: &Message) -> Result<(), SessionError> {
        let frame = self.codec.encode(message)?;
        self.writer
            .write_all(&frame)
            .await
            .map_err(SessionError::WriteFailed)
    }

    /// Enters `Active` with `identity` and starts the read loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn activate(self, identity: Identity) -> Arc<ClientSession> {
        let Self {
            conn_id,
            peer_addr,
            reader,
            writer,
            codec,
            ..
        } = self;

        let session = Arc::new(ClientSession {
            id: identity.id,
            name: identity.name,
            conn_id,
            peer_addr,
            state: Mutex::new(SessionState::Active),
            route: RwLock::new(None),
            writer: tokio::sync::Mutex::new(Some(writer)),
            codec,
            cancel: CancellationToken::new(),
        });

        tracing::info!(
            session_id = %session.id,
            name = %session.name,
            %conn_id,
            "session active"
        );

        tokio::spawn(read_loop(Arc::clone(&session), reader));
        session
    }
}

impl fmt::Debug for PendingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSession")
            .field("conn_id", &self.conn_id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

/// An active client connection with an identity.
///
/// Shared as `Arc<ClientSession>` between its read loop and whichever
/// community currently holds it.
pub struct ClientSession {
    id: SessionId,
    name: String,
    conn_id: ConnectionId,
    peer_addr: SocketAddr,
    state: Mutex<SessionState>,
    route: RwLock<Option<Route>>,
    /// `None` once disconnected.
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    codec: Arc<WireCodec>,
    /// Fired on disconnect; stops the read loop and aborts pending writes.
    cancel: CancellationToken,
}

impl ClientSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_disconnected(&self) -> bool {
        self.state() == SessionState::Disconnected
    }

    /// A consistent snapshot of both routing pointers.
    pub fn route(&self) -> Option<Route> {
        self.route
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cached id of the owning server, if placed.
    pub fn server_id(&self) -> Option<ServerId> {
        self.route().map(|r| r.server_id)
    }

    /// Cached id of the owning community, if placed.
    pub fn community_id(&self) -> Option<CommunityId> {
        self.route().map(|r| r.community_id)
    }

    /// Swaps in a new route, returning the previous one.
    ///
    /// Only the server that owns the session calls this.
    pub fn set_route(&self, route: Route) -> Option<Route> {
        let mut guard = self.route.write().unwrap_or_else(PoisonError::into_inner);
        guard.replace(route)
    }

    /// Clears both routing pointers, returning the previous route.
    pub fn clear_route(&self) -> Option<Route> {
        let mut guard = self.route.write().unwrap_or_else(PoisonError::into_inner);
        guard.take()
    }

    /// Encodes `message` and writes the full frame to the connection.
    ///
    /// A failed or partial write is returned, not retried. The caller
    /// decides whether to disconnect.
    ///
    /// # Errors
    /// - [`SessionError::Disconnected`] if the session is (or becomes,
    ///   mid-write) disconnected.
    /// - [`SessionError::Encode`] / [`SessionError::WriteFailed`].
    pub async fn write(&self, message: &Message) -> Result<(), SessionError> {
        let frame = self.codec.encode(message)?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::Disconnected(self.id))?;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SessionError::Disconnected(self.id)),
            result = writer.write_all(&frame) => result.map_err(SessionError::WriteFailed),
        }
    }

    /// Closes the connection.
    ///
    /// Idempotent: returns `false` (and does nothing else) if the session
    /// was already disconnected.
    pub async fn disconnect(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Disconnected {
                tracing::debug!(session_id = %self.id, "session already disconnected");
                return false;
            }
            *state = SessionState::Disconnected;
        }

        tracing::info!(session_id = %self.id, name = %self.name, "disconnecting session");
        self.cancel.cancel();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(session_id = %self.id, error = %e, "socket shutdown failed");
            }
        }
        true
    }

    /// Resolves once the session has been disconnected.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Forwards a decoded message to the owner its scope implies.
    async fn dispatch(&self, message: Message) {
        match message {
            Message::ClientText { sender, text } => {
                if sender != self.id {
                    tracing::debug!(
                        session_id = %self.id,
                        claimed = %sender,
                        "overriding claimed sender id"
                    );
                }
                // Snapshot under the read lock, send after releasing it.
                let Some(route) = self.route() else {
                    tracing::debug!(session_id = %self.id, "no community yet, dropping text");
                    return;
                };
                if route.community.send(Action::text(self.id, text)).await.is_err() {
                    tracing::debug!(
                        session_id = %self.id,
                        community_id = %route.community_id,
                        "community stopped, dropping text"
                    );
                }
            }
            Message::AuthRequest
            | Message::ClientIdResponse(_)
            | Message::ClientNameResponse(_) => {
                tracing::debug!(session_id = %self.id, "ignoring handshake message on active session");
            }
        }
    }

    /// Tells the owning server this session is gone.
    async fn notify_departure(self: &Arc<Self>) {
        let Some(route) = self.route() else {
            return;
        };
        let action = Action::leave_server(route.server_id.clone(), Arc::clone(self));
        if route.server.send(action).await.is_err() {
            tracing::debug!(
                session_id = %self.id,
                server_id = %route.server_id,
                "server stopped before departure notice"
            );
        }
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Reads frames until the connection fails or the session is disconnected.
///
/// Any decode error, including a clean end of stream, is final: the
/// framing layer can't resynchronize, so the session disconnects.
async fn read_loop(session: Arc<ClientSession>, mut reader: BufReader<OwnedReadHalf>) {
    tracing::debug!(session_id = %session.id, "read loop started");

    loop {
        let result = tokio::select! {
            biased;
            () = session.cancel.cancelled() => break,
            result = session.codec.read_frame(&mut reader) => result,
        };

        match result {
            Ok(message) => {
                tracing::debug!(
                    session_id = %session.id,
                    message_type = %message.message_type(),
                    "read message"
                );
                session.dispatch(message).await;
            }
            Err(DecodeError::EndOfStream) => {
                tracing::info!(session_id = %session.id, "connection closed by peer");
                session.disconnect().await;
                break;
            }
            Err(e) => {
                tracing::info!(session_id = %session.id, error = %e, "read failed");
                session.disconnect().await;
                break;
            }
        }
    }

    session.notify_departure().await;
    tracing::debug!(session_id = %session.id, "exiting read loop");
}
