//! Conserje server binary: webhook ingress, burst coalescing, turn dispatch.

mod cli;
mod serve;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use conserje::{load_runtime_settings, set_config_home_override};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Some(conf_dir) = cli.conf.clone() {
        set_config_home_override(conf_dir);
    }
    let settings = load_runtime_settings();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conserje=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    match cli.command {
        Command::Serve { bind, webhook_path } => {
            serve::run_serve(serve::ServeArgs { bind, webhook_path }, &settings).await
        }
        Command::CheckConfig => serve::run_check_config(&settings),
    }
}
