//! Engine configuration.

use serde::Deserialize;

use crate::delegate::{DEFAULT_RESPONSE_SUBJECT, DEFAULT_STREAM, DEFAULT_TASK_SUBJECT, DEFAULT_ASYNC_CALL_TIMEOUT};
use crate::error::EngineResult;

/// Engine configuration loaded from environment variables.
///
/// Environment variables are prefixed with `CONVEYOR_`:
/// - `CONVEYOR_DEFAULT_STATE_TIMEOUT_MILLIS`: Budget for async states without their own timeout
/// - `CONVEYOR_EXPIRY_SWEEP_INTERVAL_SECS`: How often suspended states are checked for expiry
/// - `CONVEYOR_RESPONSE_RETENTION_SECS`: How long unclaimed delegate responses are held
/// - `CONVEYOR_NATS_URL`: NATS server URL (optional; in-process delegates when unset)
/// - `CONVEYOR_NATS_TASK_SUBJECT`, `CONVEYOR_NATS_RESPONSE_SUBJECT`, `CONVEYOR_NATS_STREAM`
/// - `CONVEYOR_LOG_JSON`: Emit JSON log lines
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_state_timeout_millis")]
    pub default_state_timeout_millis: u64,

    #[serde(default = "default_expiry_sweep_interval_secs")]
    pub expiry_sweep_interval_secs: u64,

    #[serde(default = "default_response_retention_secs")]
    pub response_retention_secs: u64,

    #[serde(default)]
    pub nats_url: Option<String>,

    #[serde(default = "default_task_subject")]
    pub nats_task_subject: String,

    #[serde(default = "default_response_subject")]
    pub nats_response_subject: String,

    #[serde(default = "default_stream")]
    pub nats_stream: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_state_timeout_millis() -> u64 {
    DEFAULT_ASYNC_CALL_TIMEOUT
}

fn default_expiry_sweep_interval_secs() -> u64 {
    30
}

fn default_response_retention_secs() -> u64 {
    3600
}

fn default_task_subject() -> String {
    DEFAULT_TASK_SUBJECT.to_string()
}

fn default_response_subject() -> String {
    DEFAULT_RESPONSE_SUBJECT.to_string()
}

fn default_stream() -> String {
    DEFAULT_STREAM.to_string()
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `CONVEYOR_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("CONVEYOR_").from_env::<EngineConfig>()
    }

    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> EngineResult<Self> {
        dotenvy::dotenv().ok();
        Ok(Self::from_env()?)
    }

    pub fn expiry_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.expiry_sweep_interval_secs.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_state_timeout_millis: default_state_timeout_millis(),
            expiry_sweep_interval_secs: default_expiry_sweep_interval_secs(),
            response_retention_secs: default_response_retention_secs(),
            nats_url: None,
            nats_task_subject: default_task_subject(),
            nats_response_subject: default_response_subject(),
            nats_stream: default_stream(),
            log_json: false,
        }
    }
}
