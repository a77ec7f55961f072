//! The capability interface every deployment step implements.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::delegate::ResponseData;
use crate::error::{EngineError, EngineResult};
use crate::state::ExecutionResponse;

/// Responses delivered to a resumed state, keyed by correlation id.
pub type AsyncResponses = HashMap<String, ResponseData>;

/// A single step of a deployment workflow.
///
/// `execute` either finishes the step and returns a terminal status, or
/// dispatches delegate tasks and returns [`ExecutionResponse::async_on`]
/// with their correlation ids. In the latter case the executor later
/// calls `handle_async_response` exactly once with every id present.
///
/// Business failures are returned as `Ok` responses with a `FAILED`
/// status. Only contract violations may surface as `Err`.
#[async_trait]
pub trait State: Send + Sync {
    /// Display name, unique within a phase.
    fn name(&self) -> &str;

    /// Type tag, e.g. `AWS_AMI_SERVICE_DEPLOY`.
    fn state_type(&self) -> &str;

    async fn execute(&self, ctx: &mut ExecutionContext) -> EngineResult<ExecutionResponse>;

    async fn handle_async_response(
        &self,
        _ctx: &mut ExecutionContext,
        _responses: &AsyncResponses,
    ) -> EngineResult<ExecutionResponse> {
        Err(EngineError::invalid_request(format!(
            "State '{}' does not accept async responses",
            self.name()
        )))
    }

    /// Best-effort cleanup when the workflow is aborted while this state
    /// is outstanding.
    async fn handle_abort_event(&self, _ctx: &mut ExecutionContext) {}

    /// Budget for an outstanding async response. `None` means the engine
    /// default applies.
    fn timeout_millis(&self, _ctx: &ExecutionContext) -> Option<u64> {
        None
    }

    /// Field name to problem description. Empty when the state is runnable.
    fn validate_fields(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Look up the response for `correlation_id`. A missing entry means the
/// dispatching state and the delivery disagree, which is a contract violation.
pub fn require_response<'a>(
    responses: &'a AsyncResponses,
    correlation_id: &str,
) -> EngineResult<&'a ResponseData> {
    if correlation_id.is_empty() {
        return Err(EngineError::invalid_request("correlation id is required"));
    }
    responses.get(correlation_id).ok_or_else(|| {
        EngineError::invalid_request(format!(
            "No response found for correlation id {}",
            correlation_id
        ))
    })
}

/// Render a timeout expression and parse it as milliseconds, falling back
/// to `default` when the expression is unset, unresolvable or not a number.
pub fn resolve_timeout_millis(
    expression: Option<&str>,
    ctx: &ExecutionContext,
    default: Option<u64>,
) -> Option<u64> {
    let Some(expression) = expression.map(str::trim).filter(|e| !e.is_empty()) else {
        return default;
    };

    match ctx.render_expression(expression) {
        Ok(rendered) => match rendered.trim().parse::<u64>() {
            Ok(millis) if millis > 0 => Some(millis),
            _ => {
                tracing::warn!(
                    expression = %expression,
                    rendered = %rendered,
                    "Timeout did not render to a positive integer, using default"
                );
                default
            }
        },
        Err(e) => {
            tracing::warn!(expression = %expression, error = %e, "Timeout expression unresolved, using default");
            default
        }
    }
}
