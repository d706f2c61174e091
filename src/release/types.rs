//! Deployment backend types and data structures.
//!
//! This module defines the types exchanged with the deployment backend.
//! Responses are decoded into these once, at the client boundary.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resource::ValuePair;

/// Backend-defined release status code.
///
/// Codes outside the known set are kept as-is so they can be reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub i32);

impl StatusCode {
    /// The release is in an uncertain state.
    pub const UNKNOWN: Self = Self(0);
    /// The release has been pushed to the cluster.
    pub const DEPLOYED: Self = Self(1);
    /// The release has been deleted.
    pub const DELETED: Self = Self(2);
    /// The release object is outdated and a newer one exists.
    pub const SUPERSEDED: Self = Self(3);
    /// The release was not successfully deployed.
    pub const FAILED: Self = Self(4);
    /// A delete operation is underway.
    pub const DELETING: Self = Self(5);
    /// An install operation is underway.
    pub const PENDING_INSTALL: Self = Self(6);
    /// An upgrade operation is underway.
    pub const PENDING_UPGRADE: Self = Self(7);
    /// A rollback operation is underway.
    pub const PENDING_ROLLBACK: Self = Self(8);

    /// Every code the backend defines.
    pub const ALL: [Self; 9] = [
        Self::UNKNOWN,
        Self::DEPLOYED,
        Self::DELETED,
        Self::SUPERSEDED,
        Self::FAILED,
        Self::DELETING,
        Self::PENDING_INSTALL,
        Self::PENDING_UPGRADE,
        Self::PENDING_ROLLBACK,
    ];

    /// Statuses included when looking up a live release. Deleted and
    /// superseded revisions are history, not live releases.
    pub const LIVE: [Self; 7] = [
        Self::DELETING,
        Self::DEPLOYED,
        Self::FAILED,
        Self::PENDING_INSTALL,
        Self::PENDING_ROLLBACK,
        Self::PENDING_UPGRADE,
        Self::UNKNOWN,
    ];

    /// Returns true if this is one of the backend's defined codes.
    #[must_use]
    pub const fn is_defined(self) -> bool {
        self.0 >= 0 && self.0 <= 8
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            Self::UNKNOWN => "UNKNOWN",
            Self::DEPLOYED => "DEPLOYED",
            Self::DELETED => "DELETED",
            Self::SUPERSEDED => "SUPERSEDED",
            Self::FAILED => "FAILED",
            Self::DELETING => "DELETING",
            Self::PENDING_INSTALL => "PENDING_INSTALL",
            Self::PENDING_UPGRADE => "PENDING_UPGRADE",
            Self::PENDING_ROLLBACK => "PENDING_ROLLBACK",
            Self(other) => return write!(f, "CODE_{other}"),
        };
        f.write_str(name)
    }
}

/// The backend's view of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedRelease {
    /// Release name.
    pub name: String,
    /// Namespace the release is installed into.
    #[serde(default)]
    pub namespace: String,
    /// Chart the release was built from, `name-version`.
    #[serde(default)]
    pub chart: String,
    /// Release revision.
    #[serde(default)]
    pub revision: u32,
    /// Current status code.
    #[serde(default)]
    pub status: StatusCode,
}

/// A chart resolved to a concrete package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagedChart {
    /// Chart name.
    pub name: String,
    /// Resolved version.
    pub version: String,
    /// Where the backend fetches the package from.
    pub url: String,
    /// Package digest, when the repository publishes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Filter for listing releases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilter {
    /// Release name filter.
    pub name: String,
    /// Status codes to include.
    pub statuses: Vec<StatusCode>,
}

/// Request to install a new release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    /// Resolved chart.
    pub chart: PackagedChart,
    /// Release name.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Ordered value overrides.
    pub values: Vec<ValuePair>,
    /// Allow reusing the name of a deleted release.
    pub reuse_name: bool,
    /// Wait for resources to become ready before answering.
    pub wait: bool,
    /// Backend-side operation timeout.
    pub timeout: Duration,
}

/// Request to update an existing release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Release name.
    pub name: String,
    /// Resolved chart.
    pub chart: PackagedChart,
    /// Ordered value overrides.
    pub values: Vec<ValuePair>,
    /// Wait for resources to become ready before answering.
    pub wait: bool,
    /// Backend-side operation timeout.
    pub timeout: Duration,
}

/// Request to delete a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    /// Release name.
    pub name: String,
    /// Remove the release history as well.
    pub purge: bool,
    /// Backend-side operation timeout.
    pub timeout: Duration,
}

/// Outcome of a delete call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The release was deleted; carries its last known state.
    Deleted(ObservedRelease),
    /// No release with that name exists.
    NotFound,
}

impl ObservedRelease {
    /// Returns true if the backend reports this release as deployed.
    #[must_use]
    pub fn is_deployed(&self) -> bool {
        self.status == StatusCode::DEPLOYED
    }
}

impl PackagedChart {
    /// Returns the `name-version` reference used in release metadata.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_display() {
        assert_eq!(StatusCode::PENDING_INSTALL.to_string(), "PENDING_INSTALL");
        assert_eq!(StatusCode(42).to_string(), "CODE_42");
    }

    #[test]
    fn test_observed_release_decoding() {
        let json = r#"{"name":"chartmgr-rls-abc","namespace":"default","chart":"nginx-1.0.0","revision":3,"status":6}"#;
        let release: ObservedRelease = serde_json::from_str(json).expect("release should decode");
        assert_eq!(release.status, StatusCode::PENDING_INSTALL);
        assert_eq!(release.revision, 3);
        assert!(!release.is_deployed());
    }

    #[test]
    fn test_defined_codes() {
        assert!(StatusCode::ALL.iter().all(|c| c.is_defined()));
        assert!(!StatusCode(9).is_defined());
        assert!(!StatusCode(-1).is_defined());
    }
}
