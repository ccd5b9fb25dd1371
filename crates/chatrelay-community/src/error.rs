//! Error types for the community layer.

use chatrelay_session::{CommunityId, ServerId};

/// Errors returned by [`Community`](crate::Community) and
/// [`Server`](crate::Server) operations.
#[derive(Debug, thiserror::Error)]
pub enum CommunityError {
    /// `shutdown()` was called on a community that is already stopped.
    #[error("community {0} is already stopped")]
    CommunityStopped(CommunityId),

    /// `shutdown()` was called on a server that is already stopped.
    #[error("server {0} is already stopped")]
    ServerStopped(ServerId),
}
