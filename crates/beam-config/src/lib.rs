//! # beam-config
//!
//! Configuration system for Beam. Reads from `beam.toml` and environment
//! variables, with CLI overrides applied by the caller, in that precedence order.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::BeamConfig;
pub use schema::{ConfigWarning, WarningSeverity};
