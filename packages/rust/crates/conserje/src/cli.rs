//! Command-line interface for the conserje binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "conserje")]
#[command(about = "Burst-coalescing conversational backend for flow-based messaging platforms")]
pub(crate) struct Cli {
    /// Override the config home used for user-level settings
    /// (default: PRJ_CONFIG_HOME, else `.config/` under the project root).
    #[arg(long, global = true, value_name = "DIR")]
    pub(crate) conf: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the webhook HTTP server.
    Serve {
        /// Listen address, e.g. 0.0.0.0:3000.
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
        /// Route that receives webhook POSTs.
        #[arg(long, value_name = "PATH")]
        webhook_path: Option<String>,
    },
    /// Resolve settings and credentials, report the effective wiring, and exit.
    CheckConfig,
}
