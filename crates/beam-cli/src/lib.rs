//! # beam-cli
//!
//! Command-line interface for Beam.
//!
//! ## Commands
//!
//! - `beam demo`: Two simulated devices negotiate a radio link and bump
//! - `beam proximity`: Estimate distance from a signal strength reading
//! - `beam gesture`: Check whether two motion samples count as a bump
//! - `beam config`: Show configuration
//! - `beam init`: Write a default beam.toml
//! - `beam doctor`: Validate configuration

pub mod commands;

pub use commands::Cli;
