//! Desired-state and status types for managed chart releases.
//!
//! These types map to the manifest documents operators write, and to the
//! status sub-object the controller writes back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Prefix of release names generated by the controller.
pub const RELEASE_NAME_PREFIX: &str = "chartmgr-rls";

/// Namespace used when a manifest does not set one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The declared intent for one managed deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct DesiredRelease {
    /// Object identity.
    #[validate(nested)]
    pub metadata: ObjectMeta,
    /// What should be deployed.
    #[validate(nested)]
    pub spec: ReleaseSpec,
}

/// Identity of a desired-state object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ObjectMeta {
    /// Object name, unique within its namespace.
    #[validate(length(min = 1, max = 253))]
    pub name: String,
    /// Namespace the release is installed into.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Stable opaque identifier; derived from namespace and name when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    #[validate(custom(function = "validate_uid"))]
    pub uid: String,
}

/// The release specification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ReleaseSpec {
    /// Chart to deploy.
    #[validate(nested)]
    pub chart: ChartRef,
    /// Ordered value overrides. Duplicates are passed through untouched.
    #[serde(default)]
    #[validate(nested)]
    pub values: Vec<ValuePair>,
    /// Explicit release identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub release: Option<ReleaseName>,
    /// Lifecycle options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ReleaseOptions>,
}

/// Reference to a chart in a repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ChartRef {
    /// Chart name.
    #[validate(length(min = 1, max = 253))]
    pub name: String,
    /// Chart version; empty means latest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Repository holding the chart; the default repository when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub repository: Option<ChartRepository>,
}

/// A chart repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ChartRepository {
    /// Local name of the repository.
    #[validate(length(min = 1, max = 253))]
    pub name: String,
    /// Repository URL.
    #[validate(url, length(max = 2083))]
    pub url: String,
}

/// One value override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ValuePair {
    /// Dotted value path, e.g. `image.tag`.
    #[validate(length(min = 1))]
    pub name: String,
    /// Value as a string.
    #[validate(length(min = 1))]
    pub value: String,
}

/// An explicitly requested release name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ReleaseName {
    /// The release name.
    #[validate(custom(function = "validate_release_name"))]
    pub name: String,
}

/// Lifecycle options.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseOptions {
    /// Install at most once; never update or delete.
    #[serde(default)]
    pub create_only: bool,
}

/// Domain state of a managed release.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReleaseState {
    /// No release is associated yet.
    Absent,
    /// An install operation is underway.
    PendingInstall,
    /// An upgrade operation is underway.
    PendingUpgrade,
    /// A rollback operation is underway.
    PendingRollback,
    /// A delete operation is underway.
    Deleting,
    /// The release has been pushed to the cluster.
    Deployed,
    /// This release object is outdated and a newer one exists.
    Superseded,
    /// The release was not successfully deployed.
    Failed,
    /// The release has been deleted.
    Deleted,
    /// The release is in an uncertain state.
    #[default]
    Unknown,
}

/// Status written back by the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationStatus {
    /// Current domain state.
    pub state: ReleaseState,
    /// Last release name associated with the desired release.
    #[serde(rename = "release", default)]
    pub release_name: String,
    /// Error text or state name.
    #[serde(default)]
    pub message: String,
    /// When the status was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<DateTime<Utc>>,
}

fn default_namespace() -> String {
    String::from(DEFAULT_NAMESPACE)
}

/// Release names are lowercase alphanumerics and hyphens.
fn validate_release_name(name: &str) -> Result<(), validator::ValidationError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if valid {
        Ok(())
    } else {
        let mut err = validator::ValidationError::new("release_name");
        err.message = Some("must be lowercase alphanumeric with hyphens".into());
        Err(err)
    }
}

/// Returns true if `identity` is usable as a file name and a release name
/// suffix: ASCII alphanumerics and hyphens, at most 253 characters.
#[must_use]
pub fn is_valid_identity(identity: &str) -> bool {
    !identity.is_empty()
        && identity.len() <= 253
        && identity.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// An empty uid is allowed here; it is derived before use.
fn validate_uid(uid: &str) -> Result<(), validator::ValidationError> {
    if uid.is_empty() || is_valid_identity(uid) {
        Ok(())
    } else {
        let mut err = validator::ValidationError::new("uid");
        err.message = Some("must be alphanumeric with hyphens".into());
        Err(err)
    }
}

/// Computes the release name for a desired release.
///
/// The explicit override wins; otherwise the name is `chartmgr-rls-<identity>`.
/// Never consults backend state.
#[must_use]
pub fn compute_release_name(desired: &DesiredRelease) -> String {
    match &desired.spec.release {
        Some(release) => release.name.clone(),
        None => format!("{RELEASE_NAME_PREFIX}-{}", desired.identity()),
    }
}

impl DesiredRelease {
    /// Returns the stable identity of this object.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.metadata.uid
    }

    /// Fills in a deterministic uid when the manifest carries none.
    #[must_use]
    pub fn with_derived_uid(mut self) -> Self {
        if self.metadata.uid.is_empty() {
            let key = format!("{}/{}", self.metadata.namespace, self.metadata.name);
            self.metadata.uid = Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string();
        }
        self
    }

    /// Returns true when the create-only option is set.
    #[must_use]
    pub fn create_only(&self) -> bool {
        self.spec.options.is_some_and(|o| o.create_only)
    }

    /// Namespace the release lives in.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Human-readable `namespace/name` key for logs.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }
}

impl ChartRef {
    /// Requested version, empty for latest.
    #[must_use]
    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or_default()
    }

    /// Repository URL, empty when the default repository applies.
    #[must_use]
    pub fn repository_url(&self) -> &str {
        self.repository.as_ref().map_or("", |r| r.url.as_str())
    }

    /// Repository name, empty when the default repository applies.
    #[must_use]
    pub fn repository_name(&self) -> &str {
        self.repository.as_ref().map_or("", |r| r.name.as_str())
    }
}

impl ReleaseState {
    /// Returns true for the states a convergence wait may stop at.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Deployed | Self::Deleted)
    }

    /// Returns the state name as written to status messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "Absent",
            Self::PendingInstall => "PendingInstall",
            Self::PendingUpgrade => "PendingUpgrade",
            Self::PendingRollback => "PendingRollback",
            Self::Deleting => "Deleting",
            Self::Deployed => "Deployed",
            Self::Superseded => "Superseded",
            Self::Failed => "Failed",
            Self::Deleted => "Deleted",
            Self::Unknown => "Unknown",
        }
    }
}

impl ReconciliationStatus {
    /// Creates a status stamped with the current time.
    #[must_use]
    pub fn new(state: ReleaseState, release_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            state,
            release_name: release_name.into(),
            message: message.into(),
            last_reconciled: Some(Utc::now()),
        }
    }

    /// Creates a failed status.
    #[must_use]
    pub fn failed(release_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ReleaseState::Failed, release_name, message)
    }

    /// Returns true if the release is deployed.
    #[must_use]
    pub const fn is_deployed(&self) -> bool {
        matches!(self.state, ReleaseState::Deployed)
    }
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired(uid: &str, release: Option<&str>) -> DesiredRelease {
        DesiredRelease {
            metadata: ObjectMeta {
                name: String::from("web"),
                namespace: String::from(DEFAULT_NAMESPACE),
                uid: uid.to_string(),
            },
            spec: ReleaseSpec {
                chart: ChartRef {
                    name: String::from("nginx"),
                    version: None,
                    repository: None,
                },
                values: vec![],
                release: release.map(|name| ReleaseName {
                    name: name.to_string(),
                }),
                options: None,
            },
        }
    }

    #[test]
    fn test_generated_release_name() {
        assert_eq!(
            compute_release_name(&desired("abc123", None)),
            "chartmgr-rls-abc123"
        );
    }

    #[test]
    fn test_override_wins_regardless_of_identity() {
        assert_eq!(compute_release_name(&desired("abc123", Some("web"))), "web");
        assert_eq!(compute_release_name(&desired("zzz999", Some("web"))), "web");
    }

    #[test]
    fn test_release_name_deterministic() {
        let d = desired("abc123", None);
        assert_eq!(compute_release_name(&d), compute_release_name(&d.clone()));
    }

    #[test]
    fn test_derived_uid_is_stable() {
        let a = desired("", None).with_derived_uid();
        let b = desired("", None).with_derived_uid();
        assert!(!a.identity().is_empty());
        assert_eq!(a.identity(), b.identity());
        assert!(is_valid_identity(a.identity()));
        assert!(!is_valid_identity("../escaped"));

        let kept = desired("fixed", None).with_derived_uid();
        assert_eq!(kept.identity(), "fixed");
    }

    #[test]
    fn test_manifest_parsing() {
        let yaml = r"
metadata:
  name: web
  uid: abc123
spec:
  chart:
    name: nginx
    version: 1.2.3
    repository:
      name: bitnami
      url: https://charts.example.com
  values:
    - name: replicaCount
      value: '2'
  options:
    createOnly: true
";
        let d: DesiredRelease = serde_yaml::from_str(yaml).expect("manifest should parse");
        assert_eq!(d.namespace(), DEFAULT_NAMESPACE);
        assert!(d.create_only());
        assert_eq!(d.spec.chart.version(), "1.2.3");
        assert_eq!(d.spec.chart.repository_url(), "https://charts.example.com");
        assert_eq!(d.spec.values.len(), 1);
    }

    #[test]
    fn test_status_serializes_release_key() {
        let status = ReconciliationStatus {
            state: ReleaseState::Deployed,
            release_name: String::from("chartmgr-rls-abc"),
            message: String::from("Deployed"),
            last_reconciled: None,
        };
        let json = serde_json::to_value(&status).expect("status should serialize");
        assert_eq!(json["state"], "Deployed");
        assert_eq!(json["release"], "chartmgr-rls-abc");
    }

    #[test]
    fn test_terminal_states() {
        assert!(ReleaseState::Deployed.is_terminal());
        assert!(ReleaseState::Deleted.is_terminal());
        assert!(!ReleaseState::PendingInstall.is_terminal());
        assert!(!ReleaseState::Failed.is_terminal());
    }
}
