//! Which communities a server may create on demand.

use chatrelay_session::{CommunityId, ServerId};

/// Decides whether `community` may be created lazily on `server`.
///
/// Consulted only when a session asks for a community that doesn't exist
/// yet; existing communities (including `root`) are always reachable.
pub trait CommunityPolicy: Send + Sync + 'static {
    fn permits(&self, server: &ServerId, community: &CommunityId) -> bool;
}

/// Allows every community.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissivePolicy;

impl CommunityPolicy for PermissivePolicy {
    fn permits(&self, _server: &ServerId, _community: &CommunityId) -> bool {
        true
    }
}
