//! Desired-state stores.
//!
//! A store holds the desired-state objects, their status sub-objects, and
//! delivers a change feed. Two implementations are provided: an in-memory
//! store and a manifest-directory store.

mod backend;
mod local;
mod memory;

#[cfg(test)]
pub use backend::MockResourceStore;
pub use backend::{ChangeEvent, ChangeKind, ResourceStore, FEED_CAPACITY};
pub use local::{load_manifest, LocalResourceStore};
pub use memory::MemoryResourceStore;
