//! Identifiers for the two named levels of the hierarchy.
//!
//! Both are operator-chosen strings (a region name, a room name), so they
//! wrap `String` rather than a number. Separate newtypes keep a community
//! id from being passed where a server id is expected.

use std::fmt;

/// Identifies a region server (e.g. `"main"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ServerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifies a community (chat room) within one server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommunityId(String);

impl CommunityId {
    /// Name of the community every server creates at construction.
    pub const ROOT: &'static str = "root";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The landing/fallback community.
    pub fn root() -> Self {
        Self::new(Self::ROOT)
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommunityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CommunityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
