//! CLI module
//!
//! Command-line interface for running extractions.
//!
//! # Commands
//!
//! - `check` - Test that the entity list endpoint answers
//! - `discover` - Print the catalog with generated schemas
//! - `read` - Stream SCHEMA/RECORD/STATE lines to stdout

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::{error_message, render_message, Runner};
