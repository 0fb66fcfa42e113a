//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// deploy-stage - Load, validate and apply deployment stage descriptors.
#[derive(Parser, Debug)]
#[command(name = "deploy-stage")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the stage file. Ignored when `--stage` is given.
    #[arg(short, long, global = true, env = "DEPLOY_STAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Stage name, looked up as `config/deploy/<stage>.yaml`.
    #[arg(short, long, global = true)]
    pub stage: Option<String>,

    /// Build the stage from `DEPLOY_STAGE_*` environment variables.
    #[arg(long, global = true, conflicts_with = "stage")]
    pub from_env: bool,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a template stage file for `--stage` (default `production`).
    Init {
        /// Project directory (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the stage.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show the validated stage with secrets redacted.
    Show,

    /// Deploy the stage and run its post-deploy hook.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Log what would happen without contacting any host.
        #[arg(long)]
        dry_run: bool,

        /// SSH client program.
        #[arg(long, default_value = "ssh")]
        ssh_program: String,

        /// Per-command timeout in seconds.
        #[arg(long, default_value = "120")]
        timeout: u64,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}
