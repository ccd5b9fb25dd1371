//! # chatrelay
//!
//! A multi-tenant chat relay over TCP.
//!
//! Clients connect to one listening socket and are organized in a
//! three-level hierarchy:
//!
//! ```text
//! Wrapper ──→ Server (one per region) ──→ Community (one per room) ──→ ClientSession
//! ```
//!
//! Every node is an actor with a single control loop that owns its
//! children; nodes talk only through [`Action`](chatrelay_session::Action)
//! envelopes. Shutdown cascades down from the [`Wrapper`] and returns once
//! every client connection is closed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatrelay::prelude::*;
//!
//! # async fn run() -> Result<(), RelayError> {
//! let relay = Wrapper::bind(RelayConfig::from_env()?).await?;
//! // ... wait for a stop request ...
//! relay.shutdown().await
//! # }
//! ```

mod config;
mod error;
mod region;
mod wrapper;

pub use config::{
    ConfigError, RelayConfig, API_PORT_VAR, DEFAULT_CHANNEL_CAPACITY, HOST_VAR, TCP_PORT_VAR,
};
pub use error::RelayError;
pub use region::{RegionResolver, ResolveError, StaticRegion, DEFAULT_REGION};
pub use wrapper::{ServerMap, Wrapper, WrapperBuilder};

/// Everything needed to run a relay and plug in custom behavior.
pub mod prelude {
    pub use crate::{
        RegionResolver, RelayConfig, RelayError, ResolveError, StaticRegion, Wrapper,
        WrapperBuilder,
    };
    pub use chatrelay_community::{
        CommunityHandle, CommunityPolicy, PermissivePolicy, ServerHandle,
    };
    pub use chatrelay_protocol::{Message, MessageType, SessionId, WireCodec};
    pub use chatrelay_session::{
        Authenticator, ClientSession, CommunityId, Identity, IdentityAllocator,
        MembershipError, PendingSession, PlaceholderAuthenticator, ServerId, SessionError,
    };
}
