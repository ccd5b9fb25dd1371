//! Mapping a client's address to the server (region) that hosts it.

use std::net::SocketAddr;

use chatrelay_session::ServerId;

/// Region used when nothing better is known.
pub const DEFAULT_REGION: &str = "main";

/// The resolver could not place a client.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no region for {0}")]
    NoRegion(SocketAddr),
}

/// Picks the server a new session joins, from its remote address.
///
/// Called once per connection, after authentication and before the
/// session is activated. A failure drops the connection.
pub trait RegionResolver: Send + Sync + 'static {
    fn resolve(&self, peer: SocketAddr) -> Result<ServerId, ResolveError>;
}

/// Sends every client to the same region.
#[derive(Debug, Clone)]
pub struct StaticRegion {
    region: ServerId,
}

impl StaticRegion {
    pub fn new(region: impl Into<ServerId>) -> Self {
        Self {
            region: region.into(),
        }
    }
}

impl Default for StaticRegion {
    fn default() -> Self {
        Self::new(DEFAULT_REGION)
    }
}

impl RegionResolver for StaticRegion {
    fn resolve(&self, _peer: SocketAddr) -> Result<ServerId, ResolveError> {
        Ok(self.region.clone())
    }
}

impl<F> RegionResolver for F
where
    F: Fn(SocketAddr) -> Result<ServerId, ResolveError> + Send + Sync + 'static,
{
    fn resolve(&self, peer: SocketAddr) -> Result<ServerId, ResolveError> {
        self(peer)
    }
}
