//! The middle of the chatrelay hierarchy: servers and their communities.
//!
//! Both node kinds are actors. Each runs a single control loop in its own
//! Tokio task which is the only code allowed to mutate that node's
//! collections, and each exposes a cheap, cloneable handle for sending it
//! [`Action`](chatrelay_session::Action)s and reading a `watch` snapshot
//! of its state.
//!
//! # Key types
//!
//! - [`Server`] / [`ServerHandle`]: a region; owns a `root` community
//!   plus any created on demand, and rewires session routes
//! - [`Community`] / [`CommunityHandle`]: a chat room; owns its members
//!   and relays text between them
//! - [`DoneSignal`]: the one-shot stop signal both loops select on
//! - [`CommunityPolicy`]: gates on-demand community creation
//!
//! # Shutdown
//!
//! Shutdown runs top-down, then joins bottom-up: a node fires its done
//! signal, waits for its own control loop to exit and hand back what it
//! owned, and only then shuts its children down concurrently.

mod community;
mod error;
mod policy;
mod server;
mod signal;

pub use community::{Community, CommunityHandle, CommunityInfo};
pub use error::CommunityError;
pub use policy::{CommunityPolicy, PermissivePolicy};
pub use server::{CommunityMap, Server, ServerHandle};
pub use signal::DoneSignal;
