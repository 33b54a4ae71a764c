//! CLI command definitions and dispatch for the `sgm` binary.
//!
//! Uses clap derive macros for argument parsing. The binary is
//! server-first: `sgm serve` runs the API, the rest are operator
//! commands against the same data directory.

pub mod session;
pub mod status;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Streaming session gateway for the workspace agent.
#[derive(Parser)]
#[command(name = "sgm", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through the OpenTelemetry stdout exporter.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on (overrides config).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config).
        #[arg(long)]
        host: Option<String>,
    },

    /// System status dashboard.
    Status,

    /// List recently active agent sessions across all users.
    Sessions {
        /// Maximum rows to show.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
