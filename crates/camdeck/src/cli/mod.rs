//! Command-line interface for camdeck.
//!
//! This module provides the CLI structure for the `camdeck` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{AnalyzeCommand, ConfigCommand, ServeCommand};

/// camdeck - Rate-limited remote control for a camera feed
///
/// Serves a small web API and control panel for starting, pausing and
/// viewing a camera, plus an offline code-analysis endpoint. Every caller
/// gets its own request budget.
#[derive(Debug, Parser)]
#[command(name = "camdeck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP control surface
    Serve(ServeCommand),

    /// Analyze a source file locally
    Analyze(AnalyzeCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.quiet, self.verbose)
    }
}
