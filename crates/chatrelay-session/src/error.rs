//! Error types for the session layer.

use chatrelay_protocol::{DecodeError, EncodeError, SessionId};

use crate::{CommunityId, ServerId};

/// Errors tied to one client session: building it, reading from it, or
/// writing to it. They never affect sibling sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The handshake did not produce an identity.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A message could not be encoded for sending.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The peer sent something that could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Writing a frame to the socket failed.
    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// The session has already been disconnected.
    #[error("session {0} is disconnected")]
    Disconnected(SessionId),
}

/// Errors from placing a session into, or removing it from, a node.
///
/// Returned to whoever requested the change through an action's reply
/// channel. A control loop logs these; it never stops because of one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MembershipError {
    /// `add` on a session that is already present.
    #[error("session {session} is already a member of community {community}")]
    AlreadyMember {
        session: SessionId,
        community: CommunityId,
    },

    /// `remove` on a session that is absent.
    #[error("session {session} is not a member of community {community}")]
    NotMember {
        session: SessionId,
        community: CommunityId,
    },

    /// The session's route does not lead to this server.
    #[error("session {session} is not placed on server {server}")]
    NotOnServer { session: SessionId, server: ServerId },

    /// The server's policy refused to create the community.
    #[error("community {community} may not be created on server {server}")]
    CreationDenied {
        server: ServerId,
        community: CommunityId,
    },

    /// The session was disconnected before it could be placed.
    #[error("session {0} is disconnected")]
    Disconnected(SessionId),

    /// The target node's control loop has stopped.
    #[error("{0} is unavailable")]
    Unavailable(String),
}
