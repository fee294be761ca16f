//! Version stamps written into saved experiments.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Engine version recorded in every saved record and compared on load.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Layout version of a persisted record. Loaders accept any record whose
/// `major` matches their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Bumped when older loaders can no longer read the record.
    pub major: u32,
    /// Bumped when fields are added with defaults.
    pub minor: u32,
    /// Bumped for fixes that keep the layout.
    pub patch: u32,
}

impl SchemaVersion {
    /// `major.minor.patch`.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether a loader at `self` can read a record written at `other`.
    pub fn reads(&self, other: &SchemaVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
