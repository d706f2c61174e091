//! Controller configuration.
//!
//! This module handles:
//! - Controller settings with defaults and validation
//! - Loading `chartmgr.yaml` with `.env` and `CHARTMGR_*` overrides

mod parser;
mod settings;

pub use parser::{
    apply_env_overrides, find_config_file, ConfigParser, DEFAULT_CONFIG_FILES, ENV_PREFIX,
};
pub use settings::{
    ControllerConfig, DEFAULT_DEPLOY_DEADLINE_SECS, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_RELEASE_TIMEOUT_MIN, DEFAULT_RESYNC_INTERVAL_SECS,
};
