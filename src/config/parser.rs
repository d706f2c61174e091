//! Configuration loading.
//!
//! Precedence, lowest to highest: built-in defaults, the YAML file,
//! `CHARTMGR_*` environment variables. A `.env` file, when present, is
//! loaded into the environment before overrides are read.

use crate::error::{ChartMgrError, ConfigError, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use super::settings::ControllerConfig;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "CHARTMGR_";

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["chartmgr.yaml", "chartmgr.yml"];

/// Loads controller configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Directory searched for `.env` and default config files.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for `.env` and config file lookup.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ControllerConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ChartMgrError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ChartMgrError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ControllerConfig> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(ControllerConfig::default());
        }

        serde_yaml::from_str(content).map_err(|e| {
            ChartMgrError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })
    }

    /// Loads the full configuration.
    ///
    /// Reads `path` when given, otherwise the first default config file
    /// found from the base path upwards, otherwise built-in defaults.
    /// Environment overrides are applied and the result is checked.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be loaded, an override is
    /// malformed, or the result is invalid.
    pub fn load(&self, path: Option<&Path>) -> Result<ControllerConfig> {
        self.load_dotenv()?;

        let mut config = match path {
            Some(path) => self.load_file(path)?,
            None => {
                let start = self.base_path.clone().unwrap_or_else(|| PathBuf::from("."));
                match find_config_file(&start) {
                    Ok(found) => self.load_file(found)?,
                    Err(_) => {
                        debug!("No configuration file found, using defaults");
                        ControllerConfig::default()
                    }
                }
            }
        };

        apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        config.check()?;
        Ok(config)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ChartMgrError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Applies `CHARTMGR_<FIELD>` overrides read through `lookup`.
///
/// # Errors
///
/// Returns `InvalidEnvVar` for a value that does not parse.
pub fn apply_env_overrides<F>(config: &mut ControllerConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |field: &str| {
        let name = format!("{ENV_PREFIX}{field}");
        lookup(&name).map(|value| (name, value))
    };

    if let Some((_, value)) = var("BACKEND_URL") {
        debug!("Overriding backend_url from environment");
        config.backend_url = value;
    }
    if let Some((_, value)) = var("BACKEND_TOKEN") {
        debug!("Overriding backend_token from environment");
        config.backend_token = Some(value).filter(|t| !t.is_empty());
    }
    if let Some((name, value)) = var("RELEASE_TIMEOUT_MIN") {
        config.release_timeout_min = parse_var(&name, &value)?;
    }
    if let Some((name, value)) = var("POLL_INTERVAL_SECS") {
        config.poll_interval_secs = parse_var(&name, &value)?;
    }
    if let Some((name, value)) = var("DEPLOY_DEADLINE_SECS") {
        config.deploy_deadline_secs = parse_var(&name, &value)?;
    }
    if let Some((_, value)) = var("MANIFEST_DIR") {
        debug!("Overriding manifest_dir from environment");
        config.manifest_dir = PathBuf::from(value);
    }
    if let Some((name, value)) = var("RESYNC_INTERVAL_SECS") {
        config.resync_interval_secs = parse_var(&name, &value)?;
    }
    if let Some((name, value)) = var("LIVENESS_ADDR") {
        config.liveness_addr = parse_var(&name, &value)?;
    }
    if let Some((name, value)) = var("DEBUG") {
        config.debug = match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => return Err(invalid_var(&name, &value)),
        };
    }

    Ok(())
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    debug!("Overriding {name} from environment");
    value.trim().parse().map_err(|_| invalid_var(name, value))
}

fn invalid_var(name: &str, value: &str) -> ChartMgrError {
    ChartMgrError::Config(ConfigError::InvalidEnvVar {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ChartMgrError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
