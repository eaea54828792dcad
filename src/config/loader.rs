//! Configuration Loader
//!
//! Locates the agent configuration file, reads it with size limits, applies
//! environment overrides, validates it, and derives the values actions receive.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::{AgentConfig, SourceType};
use crate::constants;

/// Loaded, validated configuration
#[derive(Debug)]
pub struct ConfigManager {
    config: AgentConfig,
    source: PathBuf,
}

impl ConfigManager {
    /// Load configuration from `RUNBOOK_AGENT_CONFIG`, or `~/runbook-agent/config.json`
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let path = env::var(constants::env::CONFIG_PATH)
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "~/runbook-agent/config.json".to_string());
        Self::load_from_path(expand_home(&path))
    }

    /// Load configuration from a specific file
    pub fn load_from_path(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let path = path.as_ref();
        debug!("Loading configuration from: {}", path.display());

        let contents = Self::read_config_file_safely(path)?;
        let mut config: AgentConfig = serde_json::from_str(&contents)
            .map_err(|e| ConfigurationError::parse_error(path.display().to_string(), e))?;

        if let Ok(api_key) = env::var(constants::env::API_KEY) {
            if !api_key.is_empty() {
                config.api_key = api_key;
            }
        }
        if let Ok(directory) = env::var(constants::env::LOG_DIRECTORY) {
            if !directory.is_empty() {
                config.log_directory = Some(directory);
            }
        }

        Self::from_config(config, path)
    }

    /// Validate an already-parsed configuration
    pub fn from_config(
        mut config: AgentConfig,
        source: impl Into<PathBuf>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;

        for mapping in config.action_mappings.values_mut() {
            if mapping.source_type == SourceType::Local {
                mapping.filepath = expand_home(&mapping.filepath)
                    .to_string_lossy()
                    .into_owned();
            }
        }
        config.add_default_args();

        let source = source.into();
        info!(
            source = %source.display(),
            base_url = %config.base_url,
            actions = config.action_mappings.len(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager { config, source }))
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024;

        let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigurationError::config_file_not_found(path),
            _ => ConfigurationError::file_read_error(path.display().to_string(), e),
        })?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "Configuration file too large ({}MB > {}MB limit)",
                    metadata.len() / (1024 * 1024),
                    MAX_CONFIG_FILE_SIZE / (1024 * 1024)
                ),
            ));
        }

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "Configuration path must point to a regular file",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    let home = env::var("HOME").or_else(|_| env::var("USERPROFILE")).ok();
    match (path.strip_prefix('~'), home) {
        (Some(rest), Some(home)) => {
            PathBuf::from(home).join(rest.trim_start_matches(['/', '\\']))
        }
        _ => PathBuf::from(path),
    }
}
