//! State execution contract: statuses, responses and the `State` trait.

mod contract;
mod response;
mod status;

pub use contract::{require_response, resolve_timeout_millis, AsyncResponses, State};
pub use response::{skip_state_execution_response, ExecutionResponse, ExecutionResponseBuilder};
pub use status::{ExecutionStatus, FailureType};
