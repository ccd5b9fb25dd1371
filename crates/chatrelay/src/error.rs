//! Unified error type for chatrelay.

use chatrelay_community::CommunityError;
use chatrelay_protocol::ProtocolError;
use chatrelay_session::{MembershipError, SessionError};
use chatrelay_transport::TransportError;

use crate::{ConfigError, ResolveError};

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Binding or accepting failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Building or talking to one session failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A placement or removal was refused.
    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// A server or community was misused.
    #[error(transparent)]
    Community(#[from] CommunityError),

    /// Configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No region could be picked for a client.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// `shutdown()` was called on a relay that is already stopped.
    #[error("relay is already stopped")]
    AlreadyStopped,
}
