//! # Agent Configuration
//!
//! Configuration model for the runbook agent: credentials, the owner id messages are
//! validated against, worker pool sizing, the inbound queue, result delivery, and the
//! action mappings that bind action names to executables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use runbook_agent::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let specs = manager.config().action_specifications();
//! println!("{} actions mapped", specs.action_mappings.len());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use crate::constants::{self, action_types};
use crate::worker_pool::PoolConfiguration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config.json`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// API key used for result delivery and handed to every action
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the calling service
    #[serde(default)]
    pub base_url: String,

    /// Owner (or channel) id every inbound message must carry
    #[serde(default)]
    pub owner_id: String,

    #[serde(default)]
    pub app_name: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for JSON log files; console only when absent
    #[serde(default)]
    pub log_directory: Option<String>,

    #[serde(default)]
    pub pool: PoolConfiguration,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Kill actions still running after this many seconds
    #[serde(default)]
    pub execution_timeout_seconds: Option<u64>,

    #[serde(default)]
    pub action_mappings: HashMap<String, ActionMapping>,

    #[serde(default)]
    pub global_flags: Flags,

    #[serde(default)]
    pub global_args: Vec<String>,

    #[serde(default)]
    pub global_env: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AgentConfig {
    /// Snapshot of everything the message handler needs to resolve and invoke actions
    pub fn action_specifications(&self) -> ActionSpecifications {
        ActionSpecifications {
            action_mappings: self.action_mappings.clone(),
            global_flags: self.global_flags.clone(),
            global_args: self.global_args.clone(),
            global_env: self.global_env.clone(),
        }
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_seconds
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
    }

    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            directory: self.log_directory.clone(),
        }
    }

    /// Validate required fields and fill in defaults
    pub fn validate(&mut self) -> ConfigResult<()> {
        if self.api_key.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "apiKey",
                "configuration file",
            ));
        }

        if self.base_url.is_empty() {
            self.base_url = constants::DEFAULT_BASE_URL.to_string();
            tracing::info!(
                base_url = constants::DEFAULT_BASE_URL,
                "baseUrl is not configured, using the default"
            );
        }

        if self.action_mappings.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "actionMappings",
                "configuration file",
            ));
        }

        for (name, mapping) in &self.action_mappings {
            mapping.validate(name)?;
        }

        if !matches!(
            self.log_level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            self.log_level = default_log_level();
        }

        Ok(())
    }

    /// Prepend the arguments every action receives
    pub fn add_default_args(&mut self) {
        let mut args = vec![
            constants::global_args::API_KEY.to_string(),
            self.api_key.clone(),
            constants::global_args::BASE_URL.to_string(),
            self.base_url.clone(),
            constants::global_args::LOG_LEVEL.to_string(),
            self.log_level.to_ascii_uppercase(),
        ];
        args.append(&mut self.global_args);
        self.global_args = args;
    }
}

/// Action mappings plus the global invocation parameters shared by all actions
#[derive(Debug, Clone, Default)]
pub struct ActionSpecifications {
    pub action_mappings: HashMap<String, ActionMapping>,
    pub global_flags: Flags,
    pub global_args: Vec<String>,
    pub global_env: Vec<String>,
}

/// Whether an action's output is opaque or a structured HTTP response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    #[default]
    Custom,
    Http,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => action_types::CUSTOM,
            Self::Http => action_types::HTTP,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an action's executable lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Local,
    Git,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Git => write!(f, "git"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Named flags rendered as `-name value` argument pairs, in name order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(pub BTreeMap<String, String>);

impl Flags {
    pub fn args(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|(name, value)| [format!("-{name}"), value.clone()])
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOptions {
    pub url: String,
    #[serde(default)]
    pub private_key_filepath: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// Binds one action name to an executable and its invocation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMapping {
    #[serde(rename = "type", default)]
    pub action_type: ActionType,
    pub source_type: SourceType,
    #[serde(default)]
    pub filepath: String,
    #[serde(default)]
    pub flags: Flags,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    /// Sink identifier (file path) for the action's standard output
    #[serde(default)]
    pub stdout: Option<String>,
    /// Sink identifier (file path) for the action's standard error
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub git_options: Option<GitOptions>,
}

impl ActionMapping {
    fn validate(&self, name: &str) -> ConfigResult<()> {
        if self.source_type == SourceType::Unknown {
            return Err(ConfigurationError::invalid_value(
                "sourceType",
                name,
                "action source type should be either local or git",
            ));
        }
        if self.filepath.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "filepath",
                format!("action[{name}]"),
            ));
        }
        if self.source_type == SourceType::Git
            && self
                .git_options
                .as_ref()
                .map_or(true, |options| options.url.is_empty())
        {
            return Err(ConfigurationError::missing_required_field(
                "gitOptions",
                format!("action[{name}]"),
            ));
        }
        Ok(())
    }
}

/// Inbound queue settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    pub queue_url: String,
    pub region: String,
    pub max_number_of_messages: i32,
    pub wait_time_seconds: i32,
    pub visibility_timeout_seconds: i32,
    pub submit_timeout_millis: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_url: String::new(),
            region: String::new(),
            max_number_of_messages: 10,
            wait_time_seconds: 20,
            visibility_timeout_seconds: 30,
            submit_timeout_millis: 1_000,
        }
    }
}

impl QueueConfig {
    /// Receive batch size clamped to what the queue accepts
    pub fn batch_size(&self) -> usize {
        self.max_number_of_messages.clamp(1, 10) as usize
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_millis.max(1))
    }
}

/// Result delivery stage settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveryConfig {
    pub queue_capacity: usize,
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub initial_backoff_millis: u64,
    pub max_backoff_millis: u64,
    pub request_timeout_millis: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_concurrent: 8,
            max_attempts: 3,
            initial_backoff_millis: 500,
            max_backoff_millis: 5_000,
            request_timeout_millis: 30_000,
        }
    }
}

impl DeliveryConfig {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_millis
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_millis);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(source_type: SourceType) -> ActionMapping {
        ActionMapping {
            action_type: ActionType::Custom,
            source_type,
            filepath: "/path/to/action.sh".to_string(),
            flags: Flags::default(),
            args: vec![],
            env: vec![],
            stdout: None,
            stderr: None,
            git_options: None,
        }
    }

    fn config_with(mappings: HashMap<String, ActionMapping>) -> AgentConfig {
        AgentConfig {
            api_key: "key".to_string(),
            base_url: String::new(),
            owner_id: "owner".to_string(),
            app_name: None,
            log_level: "verbose".to_string(),
            log_directory: None,
            pool: PoolConfiguration::default(),
            queue: QueueConfig::default(),
            delivery: DeliveryConfig::default(),
            execution_timeout_seconds: None,
            action_mappings: mappings,
            global_flags: Flags::default(),
            global_args: vec!["extra".to_string()],
            global_env: vec![],
        }
    }

    #[test]
    fn test_action_mapping_deserializes_from_camel_case() {
        let json = r#"{
            "type": "http",
            "sourceType": "git",
            "filepath": "scripts/run.py",
            "flags": {"region": "eu"},
            "gitOptions": {"url": "git@example.com:runbooks.git"}
        }"#;
        let mapping: ActionMapping = serde_json::from_str(json).unwrap();
        assert_eq!(mapping.action_type, ActionType::Http);
        assert_eq!(mapping.source_type, SourceType::Git);
        assert_eq!(mapping.flags.args(), vec!["-region", "eu"]);
        assert_eq!(
            mapping.git_options.unwrap().url,
            "git@example.com:runbooks.git"
        );
    }

    #[test]
    fn test_unknown_source_type_is_rejected() {
        let json = r#"{"sourceType": "ftp", "filepath": "x"}"#;
        let mapping: ActionMapping = serde_json::from_str(json).unwrap();
        assert_eq!(mapping.source_type, SourceType::Unknown);

        let mut config = config_with(HashMap::from([("Ftp".to_string(), mapping)]));
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_git_mapping_requires_git_options() {
        let mut config = config_with(HashMap::from([(
            "Close".to_string(),
            mapping(SourceType::Git),
        )]));
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("gitOptions"));
    }

    #[test]
    fn test_validate_applies_defaults_and_default_args() {
        let mut config = config_with(HashMap::from([(
            "Create".to_string(),
            mapping(SourceType::Local),
        )]));
        config.validate().unwrap();
        config.add_default_args();

        assert_eq!(config.base_url, constants::DEFAULT_BASE_URL);
        assert_eq!(config.log_level, "info");
        assert_eq!(
            config.global_args,
            vec![
                "-apiKey",
                "key",
                "-baseUrl",
                constants::DEFAULT_BASE_URL,
                "-logLevel",
                "INFO",
                "extra"
            ]
        );
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let mut config = config_with(HashMap::from([(
            "Create".to_string(),
            mapping(SourceType::Local),
        )]));
        config.api_key.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
    }

    #[test]
    fn test_delivery_backoff_is_capped() {
        let delivery = DeliveryConfig::default();
        assert_eq!(delivery.backoff_for(1), Duration::from_millis(500));
        assert_eq!(delivery.backoff_for(2), Duration::from_millis(1_000));
        assert_eq!(delivery.backoff_for(10), Duration::from_millis(5_000));
    }
}
