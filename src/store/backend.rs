//! Resource store trait definition.
//!
//! This module defines the common interface for desired-state stores.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::convergence::Shutdown;
use crate::error::Result;
use crate::resource::{DesiredRelease, ReconciliationStatus};

/// Capacity of change feed channels.
pub const FEED_CAPACITY: usize = 64;

/// Kind of change delivered by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The object appeared, or is being replayed at watch start.
    Added,
    /// The object's spec changed.
    Updated,
    /// The object was removed.
    Deleted,
}

/// One change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// The object as it was last seen.
    pub desired: DesiredRelease,
}

impl ChangeEvent {
    /// Creates a new change event.
    #[must_use]
    pub const fn new(kind: ChangeKind, desired: DesiredRelease) -> Self {
        Self { kind, desired }
    }

    /// Identity of the object this event is about.
    #[must_use]
    pub fn identity(&self) -> &str {
        self.desired.identity()
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Trait for desired-state stores.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Lists the desired-state objects currently known.
    async fn list(&self) -> Result<Vec<DesiredRelease>>;

    /// Reads the status sub-object of an object.
    ///
    /// Returns `None` if no status was written yet.
    async fn get_status(&self, identity: &str) -> Result<Option<ReconciliationStatus>>;

    /// Writes the status sub-object of an object. Always a full overwrite.
    async fn put_status(&self, identity: &str, status: &ReconciliationStatus) -> Result<()>;

    /// Starts a change feed.
    ///
    /// Every current object is delivered as `Added` first, then changes as
    /// they happen. The feed ends when `shutdown` fires.
    async fn watch(&self, shutdown: Shutdown) -> Result<mpsc::Receiver<ChangeEvent>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
