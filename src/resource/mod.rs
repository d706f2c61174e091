//! Desired-state model for managed chart releases.
//!
//! This module handles everything about the objects operators declare:
//! - The manifest and status types
//! - Release name computation
//! - Manifest validation
//! - Spec hashing for change detection

mod hash;
mod types;
mod validation;

pub use hash::SpecHasher;
pub use types::{
    ChartRef, ChartRepository, DesiredRelease, ObjectMeta, ReconciliationStatus, ReleaseName,
    ReleaseOptions, ReleaseSpec, ReleaseState, ValuePair, compute_release_name, is_valid_identity,
    DEFAULT_NAMESPACE, RELEASE_NAME_PREFIX,
};
pub use validation::{ResourceValidator, ValidationError, ValidationResult};
