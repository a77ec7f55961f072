//! Error types for the Conveyor engine.
//!
//! Errors split into two families:
//!
//! - **Contract violations** (`InvalidRequest`, `StateExecution`, `Config`):
//!   propagated out of a state and fatal to the workflow instance.
//! - **Business failures** (everything else): caught at the state boundary
//!   and translated into a `FAILED` [`ExecutionResponse`](crate::state::ExecutionResponse).

use thiserror::Error;

use crate::state::FailureType;

/// Engine-level errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Contract violation: missing argument, unknown correlation id,
    /// malformed configuration.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Sweeping output store or other persistence collaborator unavailable.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Delegate task submission failed.
    #[error("Delegate error: {0}")]
    Delegate(String),

    /// Expression could not be rendered.
    #[error("{0}")]
    Expression(String),

    /// Referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Authentication/authorization against a provider failed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// NATS messaging error
    #[error("NATS error: {0}")]
    Nats(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A state raised a contract violation; carries the offending state and phase.
    #[error("State '{state}' failed{}: {source}", phase_suffix(.phase))]
    StateExecution {
        state: String,
        phase: Option<String>,
        #[source]
        source: Box<EngineError>,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Shorthand for an [`EngineError::InvalidRequest`].
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Attach state/phase context to an error escaping a state.
    pub fn in_state(self, state: impl Into<String>, phase: Option<String>) -> Self {
        match self {
            already @ Self::StateExecution { .. } => already,
            other => Self::StateExecution {
                state: state.into(),
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Whether this error must propagate to the orchestrator instead of
    /// becoming a `FAILED` response.
    pub fn is_contract_violation(&self) -> bool {
        match self {
            Self::InvalidRequest(_) | Self::Config(_) | Self::Internal(_) => true,
            Self::StateExecution { .. } => true,
            _ => false,
        }
    }

    /// Failure types implied by this error when surfaced as a business failure.
    pub fn failure_types(&self) -> Vec<FailureType> {
        match self {
            Self::Nats(_) | Self::Database(_) | Self::Persistence(_) => {
                vec![FailureType::Connectivity]
            }
            Self::Delegate(_) => vec![FailureType::DelegateProvisioning],
            Self::Auth(_) => vec![FailureType::Authentication],
            _ => vec![FailureType::ApplicationError],
        }
    }
}

fn phase_suffix(phase: &Option<String>) -> String {
    phase
        .as_deref()
        .map(|p| format!(" in phase '{}'", p))
        .unwrap_or_default()
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<envy::Error> for EngineError {
    fn from(err: envy::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<minijinja::Error> for EngineError {
    fn from(err: minijinja::Error) -> Self {
        EngineError::Expression(err.to_string())
    }
}
