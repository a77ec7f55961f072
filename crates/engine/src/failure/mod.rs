//! Failure classification and failure strategies.

mod classify;
mod strategy;

pub use classify::{classify_delegate_response, failure_response_from_error};
pub use strategy::{
    advise, effective_failure_types, select_strategy, FailureAction, FailureAdvice, FailureStrategy,
};
