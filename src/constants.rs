//! # Agent Constants
//!
//! Wire-level names and built-in defaults shared across the agent.

/// Result callback endpoint, relative to the configured base URL
pub const RESULT_PATH: &str = "/jsm/ops/jec/v1/callback";

/// Authorization scheme used when delivering results
pub const AUTHORIZATION_SCHEME: &str = "GenieKey";

/// Content type of delivered result payloads
pub const RESULT_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Default base URL when the configuration omits one
pub const DEFAULT_BASE_URL: &str = "https://api.atlassian.com";

/// Directory holding git clones actions run from
pub const REPOSITORY_ROOT: &str = "~/runbook-agent/repositories";

/// Message attribute names checked against the configured owner id
pub mod attributes {
    pub const OWNER_ID: &str = "ownerId";
    pub const CHANNEL_ID: &str = "channelId";
}

/// Action type names as they appear in configuration and payloads
pub mod action_types {
    pub const CUSTOM: &str = "custom";
    pub const HTTP: &str = "http";
}

/// Child process contract for the callback channel
pub mod callback {
    /// Pipe name prefix; the execution id is appended
    pub const PIPE_PREFIX: &str = "runbookCallbackPipe-";
    /// Trailing argument announcing the pipe path
    pub const PIPE_ARG: &str = "-callbackPipe";
    /// Environment variable carrying the pipe path
    pub const PIPE_ENV: &str = "RUNBOOK_CALLBACK_PIPE";
    /// Written by the executor to release a reader the child never connected to
    pub const TERMINATOR: &str = "\u{0}runbook-execution-finished\u{0}";
}

/// Worker pool defaults applied to missing or non-positive configuration values
pub mod pool_defaults {
    pub const MIN_WORKERS: usize = 4;
    pub const MAX_WORKERS: usize = 12;
    pub const QUEUE_CAPACITY: usize = 16;
    pub const KEEP_ALIVE_MILLIS: u64 = 6_000;
    pub const MONITORING_PERIOD_MILLIS: u64 = 15_000;
    /// Share of queue capacity that counts as back-pressure
    pub const PRESSURE_RATIO: f64 = 0.8;
    /// Consecutive pressured monitoring cycles before a worker is added
    pub const PRESSURE_CYCLES: u32 = 2;
}

/// Default global arguments prepended to every action invocation
pub mod global_args {
    pub const API_KEY: &str = "-apiKey";
    pub const BASE_URL: &str = "-baseUrl";
    pub const LOG_LEVEL: &str = "-logLevel";
    pub const PAYLOAD: &str = "-payload";
}

/// Environment variables read by the configuration loader
pub mod env {
    pub const CONFIG_PATH: &str = "RUNBOOK_AGENT_CONFIG";
    pub const API_KEY: &str = "RUNBOOK_AGENT_API_KEY";
    pub const LOG_DIRECTORY: &str = "RUNBOOK_AGENT_LOG_DIR";
}
