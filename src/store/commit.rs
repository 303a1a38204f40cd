//! Commit log records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Atomic snapshot of the name -> version changes applied together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    id: u64,
    message: String,
    timestamp: DateTime<Utc>,
    objects: BTreeMap<String, u64>,
}

impl Commit {
    pub(crate) const fn new(
        id: u64,
        message: String,
        timestamp: DateTime<Utc>,
        objects: BTreeMap<String, u64>,
    ) -> Self {
        Self {
            id,
            message,
            timestamp,
            objects,
        }
    }

    /// Monotonic sequence id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Commit message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Commit time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Objects written by this commit.
    #[must_use]
    pub const fn objects(&self) -> &BTreeMap<String, u64> {
        &self.objects
    }

    /// Version of `name` written by this commit, if any.
    #[must_use]
    pub fn version_of(&self, name: &str) -> Option<u64> {
        self.objects.get(name).copied()
    }
}

/// Repository-wide sync point recorded before publishing to a mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    id: u64,
    message: String,
    timestamp: DateTime<Utc>,
    /// Last commit id covered by this checkpoint
    last_commit: Option<u64>,
}

impl Checkpoint {
    pub(crate) const fn new(
        id: u64,
        message: String,
        timestamp: DateTime<Utc>,
        last_commit: Option<u64>,
    ) -> Self {
        Self {
            id,
            message,
            timestamp,
            last_commit,
        }
    }

    /// Checkpoint sequence id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Checkpoint message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Creation time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Last commit id covered.
    #[must_use]
    pub const fn last_commit(&self) -> Option<u64> {
        self.last_commit
    }
}
