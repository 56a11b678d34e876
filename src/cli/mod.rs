//! CLI module for the ERP copilot
//!
//! Provides command-line interface parsing and handling for the copilot-server binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod commands;
pub mod init;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ERP Copilot - multi-agent assistant orchestrator
///
/// Classifies ERP requests, routes them to specialized agents and
/// synthesizes one answer from their results.
#[derive(Parser, Debug)]
#[command(
    name = "copilot-server",
    version,
    about = "ERP Copilot - multi-agent assistant orchestrator",
    long_about = "Classifies natural-language ERP requests, routes them to specialized agents\n\
                  (query, action, analytics, scheduler, compliance, help) and synthesizes\n\
                  one response from their partial results.\n\n\
                  Run without arguments to start an interactive session on stdin, or use 'init'\n\
                  to scaffold a new configuration.",
    after_help = "EXAMPLES:\n    \
                  copilot-server init                          # Scaffold copilot.toml\n    \
                  copilot-server check                         # Validate the configuration\n    \
                  copilot-server route \"update employee EMP-5\" # Show the execution plan\n    \
                  copilot-server agents                        # List configured agents\n    \
                  copilot-server --config my.toml              # Start with a custom config file"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "copilot.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold a copilot.toml, .env.example and .gitignore
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite existing files without prompting
        #[arg(short, long)]
        force: bool,

        /// Only configure the model-backed agents (query, analytics, help)
        #[arg(short, long)]
        minimal: bool,
    },

    /// Validate the configuration file and print warnings
    Check,

    /// Classify an utterance and print the execution plan without dispatching it
    Route {
        /// The utterance to plan
        text: String,
    },

    /// List configured agents
    Agents,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
