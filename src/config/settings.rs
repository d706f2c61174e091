//! Controller configuration.
//!
//! Settings can come from an optional YAML file and from `CHARTMGR_*`
//! environment variables; see the parser for precedence.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use crate::error::{ChartMgrError, ConfigError, Result};
use crate::reconciler::ReconcileSettings;

/// Default release operation timeout in minutes.
pub const DEFAULT_RELEASE_TIMEOUT_MIN: u64 = 5;

/// Default convergence poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default convergence deadline in seconds.
pub const DEFAULT_DEPLOY_DEADLINE_SECS: u64 = 120;

/// Default manifest rescan interval in seconds.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 10;

/// Upper bound for every interval setting, in seconds.
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Slack added to the release timeout for HTTP requests that wait on it.
const HTTP_TIMEOUT_SLACK_SECS: u64 = 30;

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "snake_case")]
#[validate(schema(function = "validate_intervals"))]
pub struct ControllerConfig {
    /// Base URL of the deployment backend.
    #[validate(url)]
    pub backend_url: String,

    /// Bearer token for the deployment backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_token: Option<String>,

    /// Bound on each install, update and delete, in minutes.
    #[validate(range(min = 1, max = 1440))]
    pub release_timeout_min: u64,

    /// Interval between convergence polls, in seconds.
    #[validate(range(min = 1, max = MAX_INTERVAL_SECS))]
    pub poll_interval_secs: u64,

    /// Convergence deadline, in seconds.
    #[validate(range(min = 1, max = MAX_INTERVAL_SECS))]
    pub deploy_deadline_secs: u64,

    /// Directory holding desired-release manifests.
    pub manifest_dir: PathBuf,

    /// Manifest rescan interval, in seconds.
    #[validate(range(min = 1, max = MAX_INTERVAL_SECS))]
    pub resync_interval_secs: u64,

    /// Address of the liveness endpoint.
    pub liveness_addr: SocketAddr,

    /// Enables debug logging.
    pub debug: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            backend_url: String::from("http://127.0.0.1:44134"),
            backend_token: None,
            release_timeout_min: DEFAULT_RELEASE_TIMEOUT_MIN,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            deploy_deadline_secs: DEFAULT_DEPLOY_DEADLINE_SECS,
            manifest_dir: PathBuf::from("manifests"),
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            liveness_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            debug: false,
        }
    }
}

fn validate_intervals(config: &ControllerConfig) -> std::result::Result<(), validator::ValidationError> {
    if config.poll_interval_secs > config.deploy_deadline_secs {
        let mut err = validator::ValidationError::new("intervals");
        err.message = Some("poll_interval_secs must not exceed deploy_deadline_secs".into());
        return Err(err);
    }
    Ok(())
}

impl ControllerConfig {
    /// Checks every setting.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn check(&self) -> Result<()> {
        let Err(errors) = self.validate() else {
            return Ok(());
        };

        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        let (field, message) = fields
            .first()
            .and_then(|(field, errs)| {
                errs.first().map(|e| {
                    let message = e
                        .message
                        .as_ref()
                        .map_or_else(|| format!("invalid value ({})", e.code), ToString::to_string);
                    (field.to_string(), message)
                })
            })
            .unwrap_or_else(|| (String::from("config"), errors.to_string()));

        Err(ChartMgrError::Config(ConfigError::validation(
            format!("{field}: {message}"),
            field,
        )))
    }

    /// Bound on release operations.
    #[must_use]
    pub const fn release_timeout(&self) -> Duration {
        Duration::from_secs(self.release_timeout_min * 60)
    }

    /// Timeout for HTTP requests to the backend.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.release_timeout_min * 60 + HTTP_TIMEOUT_SLACK_SECS)
    }

    /// Manifest rescan interval.
    #[must_use]
    pub const fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Timing settings for the reconciler.
    #[must_use]
    pub const fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            release_timeout: self.release_timeout(),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            deploy_deadline: Duration::from_secs(self.deploy_deadline_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControllerConfig::default();
        config.check().expect("defaults should be valid");
        assert_eq!(config.release_timeout(), Duration::from_secs(300));
        assert_eq!(config.reconcile_settings(), ReconcileSettings::default());
        assert_eq!(config.liveness_addr.port(), 8080);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ControllerConfig {
            release_timeout_min: 0,
            ..ControllerConfig::default()
        };
        let err = config.check().expect_err("zero timeout must fail");
        assert!(err.to_string().contains("release_timeout_min"));
    }

    #[test]
    fn test_poll_longer_than_deadline_rejected() {
        let config = ControllerConfig {
            poll_interval_secs: 300,
            deploy_deadline_secs: 60,
            ..ControllerConfig::default()
        };
        assert!(config.check().is_err());
    }

    #[test]
    fn test_huge_deadline_rejected() {
        let config = ControllerConfig {
            deploy_deadline_secs: u64::MAX,
            ..ControllerConfig::default()
        };
        let err = config.check().expect_err("deadline above a day must fail");
        assert!(err.to_string().contains("deploy_deadline_secs"));
    }

    #[test]
    fn test_backend_url_must_be_url() {
        let config = ControllerConfig {
            backend_url: String::from("not a url"),
            ..ControllerConfig::default()
        };
        assert!(config.check().is_err());
    }
}
