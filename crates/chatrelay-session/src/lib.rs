//! Client session management for chatrelay.
//!
//! This crate handles everything about one client connection, plus the
//! vocabulary the hierarchy uses to talk about sessions:
//!
//! 1. **Identity**: unique ids ([`IdentityAllocator`]) and the pluggable
//!    handshake ([`Authenticator`])
//! 2. **Sessions**: [`PendingSession`] while authenticating,
//!    [`ClientSession`] once active (read loop, writes, disconnect,
//!    routing pointers)
//! 3. **Actions**: [`Action`] envelopes, the only thing nodes send
//!    each other
//!
//! # How it fits in the stack
//!
//! ```text
//! Community / Server layer (above)  ← owns sessions, reacts to actions
//!     ↕
//! Session layer (this crate)  ← identity, connection state, routing
//!     ↕
//! Protocol / Transport (below)  ← frames and sockets
//! ```

#![allow(async_fn_in_trait)]

mod action;
mod allocator;
mod auth;
mod error;
mod ids;
mod session;

pub use action::{
    invariant_violation, Action, ActionKind, ActionReceiver, ActionResult,
    ActionSender, Reply,
};
pub use allocator::IdentityAllocator;
pub use auth::{Authenticator, Identity, PlaceholderAuthenticator};
pub use error::{MembershipError, SessionError};
pub use ids::{CommunityId, ServerId};
pub use session::{ClientSession, PendingSession, Route, SessionState};
