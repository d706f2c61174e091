//! Spec hashing for change detection.
//!
//! The manifest store uses these hashes to tell an edited object from one
//! that was merely re-read.

use sha2::{Digest, Sha256};

use super::types::DesiredRelease;

/// Hasher for desired-release specs.
#[derive(Debug, Default)]
pub struct SpecHasher;

impl SpecHasher {
    /// Creates a new spec hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash over everything that influences reconciliation.
    ///
    /// Value order is significant, since later duplicates override earlier ones.
    #[must_use]
    pub fn hash_release(&self, desired: &DesiredRelease) -> String {
        let mut hasher = Sha256::new();

        // Identity
        hasher.update(desired.metadata.namespace.as_bytes());
        hasher.update([0]);
        hasher.update(desired.metadata.name.as_bytes());
        hasher.update([0]);
        hasher.update(desired.metadata.uid.as_bytes());
        hasher.update([0]);

        // Chart
        let chart = &desired.spec.chart;
        hasher.update(chart.name.as_bytes());
        hasher.update([0]);
        hasher.update(chart.version().as_bytes());
        hasher.update([0]);
        hasher.update(chart.repository_name().as_bytes());
        hasher.update([0]);
        hasher.update(chart.repository_url().as_bytes());
        hasher.update([0]);

        // Values, in declaration order
        for value in &desired.spec.values {
            hasher.update(value.name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.value.as_bytes());
            hasher.update([0]);
        }

        if let Some(release) = &desired.spec.release {
            hasher.update(b"release:");
            hasher.update(release.name.as_bytes());
        }
        hasher.update([u8::from(desired.create_only())]);

        hex::encode(hasher.finalize())
    }

    /// Returns a short version of a hash (first 8 characters).
    #[must_use]
    pub fn short_hash<'a>(&self, hash: &'a str) -> &'a str {
        hash.get(..8).unwrap_or(hash)
    }

    /// Compares two hashes.
    #[must_use]
    pub fn hashes_match(a: &str, b: &str) -> bool {
        a == b
    }
}
