//! Logging helpers for collaborator calls whose failure must not fail a
//! state, e.g. task detail bookkeeping and activity status updates.
//!
//! ```ignore
//! use conveyor_engine::result_ext::ResultExt;
//!
//! service
//!     .update_status(&activity_id, app_id, ExecutionStatus::Failed)
//!     .await
//!     .log_and_discard(format!("failing activity {}", activity_id));
//! ```

use std::fmt::Display;
use std::panic::Location;

pub trait ResultExt<T, E> {
    /// Log an `Err` at the caller's location and hand the result back.
    fn log<S: ToString>(self, context: S) -> Result<T, E>;

    /// Log an `Err` and drop it.
    fn log_and_discard<S: ToString>(self, context: S) -> Option<T>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(e) = &self {
            let at = Location::caller();
            tracing::error!(
                target: "conveyor_engine",
                error = %e,
                at = %format!("{}:{}", at.file(), at.line()),
                context = %context.to_string(),
                "Collaborator call failed"
            );
        }
        self
    }

    #[track_caller]
    fn log_and_discard<S: ToString>(self, context: S) -> Option<T> {
        self.log(context).ok()
    }
}

pub trait OptionResultExt<T> {
    /// Warn when the value is missing.
    fn log_none<S: ToString>(self, context: S) -> Option<T>;
}

impl<T> OptionResultExt<T> for Option<T> {
    #[track_caller]
    fn log_none<S: ToString>(self, context: S) -> Option<T> {
        if self.is_none() {
            let at = Location::caller();
            tracing::warn!(
                target: "conveyor_engine",
                at = %format!("{}:{}", at.file(), at.line()),
                context = %context.to_string(),
                "Nothing found"
            );
        }
        self
    }
}
