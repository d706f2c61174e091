//! Error types for the chart manager controller.
//!
//! This module provides the error hierarchy for every stage of a
//! reconciliation: configuration, the resource store, the deployment
//! backend, and the reconciler itself.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for the chart manager controller.
#[derive(Debug, Error)]
pub enum ChartMgrError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource store errors.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Deployment backend and release lifecycle errors.
    #[error("Release error: {0}")]
    Release(#[from] ReleaseError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// A configuration or manifest document could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An environment variable held a value of the wrong shape.
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
    },
}

/// Resource store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Stored data could not be read back.
    #[error("Stored data is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// An identity that cannot be used as a storage key.
    #[error("Invalid identity {identity:?}: must be alphanumeric with hyphens")]
    InvalidIdentity {
        /// The rejected identity.
        identity: String,
    },

    /// A write to the store failed.
    #[error("Failed to write to store: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// Serialization error.
    #[error("Store serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Deployment backend and release lifecycle errors.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// The chart or its repository could not be found.
    #[error("Failed to resolve chart {chart} (version: {version}, repository: {repository}): {message}")]
    Resolution {
        /// Chart name.
        chart: String,
        /// Requested version, `latest` when empty.
        version: String,
        /// Repository URL the chart was looked up in.
        repository: String,
        /// Details from the resolver.
        message: String,
    },

    /// The backend could not be reached or failed to answer.
    #[error("Deployment backend unavailable: {message}")]
    BackendUnavailable {
        /// Description of the transport failure.
        message: String,
    },

    /// The backend rejected the request.
    #[error("Deployment backend rejected request: {status} - {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error message from the backend.
        message: String,
    },

    /// More than one release matched a single managed identity.
    #[error("Multiple releases ({count}) found for release {name}")]
    AmbiguousRelease {
        /// The release name used as filter.
        name: String,
        /// Number of matching releases.
        count: usize,
    },

    /// The backend answered with something that cannot be decoded.
    #[error("Invalid response from deployment backend: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// An operation or a convergence wait ran past its deadline.
    #[error("Timed out after {}s waiting for release {name} to {operation}", .waited.as_secs())]
    Timeout {
        /// Release name.
        name: String,
        /// What was being waited for.
        operation: String,
        /// How long the wait lasted.
        waited: Duration,
    },

    /// The wait was cancelled by a shutdown signal.
    #[error("Cancelled while waiting for release {name}")]
    Cancelled {
        /// Release name.
        name: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Cleanup of a release orphaned by an identity change failed.
    #[error("Failed to delete stale release {stale} (computed release is {computed}): {source}")]
    StaleIdentityDelete {
        /// The stored release name that no longer matches.
        stale: String,
        /// The freshly computed release name.
        computed: String,
        /// Underlying delete failure.
        #[source]
        source: ReleaseError,
    },

    /// The desired-state object failed validation.
    #[error("Invalid desired release {identity}: {message}")]
    InvalidResource {
        /// Identity of the object.
        identity: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result type alias for chart manager operations.
pub type Result<T> = std::result::Result<T, ChartMgrError>;

/// Result type alias for deployment backend calls.
pub type ReleaseResult<T> = std::result::Result<T, ReleaseError>;

impl ChartMgrError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if a later redelivery of the same event may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Release(
                ReleaseError::BackendUnavailable { .. } | ReleaseError::Timeout { .. }
            ) | Self::Reconcile(ReconcileError::StaleIdentityDelete {
                source: ReleaseError::BackendUnavailable { .. } | ReleaseError::Timeout { .. },
                ..
            }) | Self::Store(StoreError::WriteFailed { .. })
        )
    }

    /// Returns true if this error came from a shutdown signal rather than a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Release(ReleaseError::Cancelled { .. }))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StoreError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ReleaseError {
    /// Creates a backend-unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    /// Creates a rejected-request error.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let unavailable = ChartMgrError::from(ReleaseError::unavailable("connection refused"));
        assert!(unavailable.is_transient());

        let ambiguous = ChartMgrError::from(ReleaseError::AmbiguousRelease {
            name: String::from("foo"),
            count: 2,
        });
        assert!(!ambiguous.is_transient());

        let stale = ChartMgrError::from(ReconcileError::StaleIdentityDelete {
            stale: String::from("old"),
            computed: String::from("new"),
            source: ReleaseError::unavailable("down"),
        });
        assert!(stale.is_transient());
    }

    #[test]
    fn test_cancelled_is_not_timeout() {
        let cancelled = ChartMgrError::from(ReleaseError::Cancelled {
            name: String::from("rls"),
        });
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_transient());
    }

    #[test]
    fn test_timeout_message() {
        let err = ReleaseError::Timeout {
            name: String::from("chartmgr-rls-abc"),
            operation: String::from("deploy"),
            waited: Duration::from_secs(120),
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 120s waiting for release chartmgr-rls-abc to deploy"
        );
    }
}
