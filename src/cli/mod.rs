//! CLI module for the deploy-stage tool.
//!
//! This module provides the command-line interface for validating and
//! applying stage descriptors.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
