//! Configuration loading from environment variables using `envy`.

mod database;
mod engine;

pub use database::DatabaseConfig;
pub use engine::EngineConfig;
