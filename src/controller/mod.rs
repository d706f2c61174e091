//! Controller runtime.
//!
//! This module provides:
//! - The controller consuming the change feed with per-identity workers
//! - The liveness flag and its HTTP endpoint

mod liveness;
mod runner;

pub use liveness::{router, Liveness, LivenessServer};
pub use runner::{Controller, EventHandler, RunSummary};
