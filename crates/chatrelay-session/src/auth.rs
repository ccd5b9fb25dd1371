//! Authentication hook for assigning a client identity.
//!
//! chatrelay doesn't define the identity handshake itself. Instead it
//! defines the [`Authenticator`] trait: given a pending connection, produce
//! an `(id, name)` pair or fail. The relay calls it during the session
//! build step, before the session's read loop starts.
//!
//! The implementation gets read/write access to the connection through
//! [`PendingSession`], so it can run any exchange built from the protocol's
//! message types (for instance: send `AuthRequest`, wait for a
//! `ClientNameResponse`). [`PlaceholderAuthenticator`] skips the exchange
//! entirely and is what the relay uses by default.

use std::future::Future;
use std::sync::Arc;

use chatrelay_protocol::SessionId;

use crate::{IdentityAllocator, PendingSession, SessionError};

/// The identity a session is activated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: SessionId,
    pub name: String,
}

/// Produces an identity for a raw connection.
///
/// # Trait bounds
///
/// - `Send + Sync` → one authenticator is shared by the build loop for
///   every connection.
/// - `'static` → it lives as long as the relay.
///
/// # Example
///
/// ```rust
/// use chatrelay_protocol::{Message, SessionId};
/// use chatrelay_session::{Authenticator, Identity, PendingSession, SessionError};
///
/// /// Asks the client for its name; numbers connections itself.
/// struct AskName;
///
/// impl Authenticator for AskName {
///     async fn authenticate(
///         &self,
///         pending: &mut PendingSession,
///     ) -> Result<Identity, SessionError> {
///         pending.write_message(&Message::AuthRequest).await?;
///         match pending.read_message().await? {
///             Message::ClientNameResponse(name) => Ok(Identity {
///                 id: SessionId(pending.conn_id().into_inner() as u32),
///                 name,
///             }),
///             other => Err(SessionError::AuthFailed(format!(
///                 "expected a name, got {}",
///                 other.message_type()
///             ))),
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Runs the handshake on `pending`.
    ///
    /// # Returns
    /// - `Ok(Identity)`: the session may be activated with this identity
    /// - `Err(SessionError)`: the connection is dropped; nothing reaches
    ///   the hierarchy
    fn authenticate(
        &self,
        pending: &mut PendingSession,
    ) -> impl Future<Output = Result<Identity, SessionError>> + Send;
}

/// Assigns the next allocator id and a name derived from it, without
/// talking to the client.
#[derive(Debug, Clone)]
pub struct PlaceholderAuthenticator {
    allocator: Arc<IdentityAllocator>,
}

impl PlaceholderAuthenticator {
    pub fn new(allocator: Arc<IdentityAllocator>) -> Self {
        Self { allocator }
    }
}

impl Authenticator for PlaceholderAuthenticator {
    async fn authenticate(
        &self,
        pending: &mut PendingSession,
    ) -> Result<Identity, SessionError> {
        let id = self.allocator.next();
        tracing::debug!(conn_id = %pending.conn_id(), session_id = %id, "assigned placeholder identity");
        Ok(Identity {
            id,
            name: format!("Client_{}", id.into_inner()),
        })
    }
}
