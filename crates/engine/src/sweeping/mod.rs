//! Scope-qualified outputs shared between states and phases.
//!
//! A writer saves an output under a stable name; a reader in another
//! phase, retry or rollback pass builds an inquiry from its own context
//! and resolves the newest matching instance.

mod instance;
mod postgres;
mod store;

pub use instance::{
    ScopeIds, SweepingOutputBuilder, SweepingOutputInquiry, SweepingOutputInstance,
    SweepingOutputScope,
};
pub use postgres::{PgSweepingOutputStore, CREATE_TABLE_SQL};
pub use store::{find_sweeping_output, InMemorySweepingOutputStore, SweepingOutputService};
