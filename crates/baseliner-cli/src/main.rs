mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let url = cli.url;

    match cli.command {
        Command::MintEnrollToken { admin_key, note, expires_in_seconds } => {
            commands::mint_enroll_token(&url, &admin_key, note, expires_in_seconds).await
        }
        Command::Enroll { enroll_token, device_key, hostname } => {
            commands::enroll(&url, enroll_token, device_key, hostname).await
        }
        Command::GetPolicy { device_token } => commands::get_policy(&url, &device_token).await,
        Command::ListDevices { admin_key, status } => commands::list_devices(&url, &admin_key, status).await,
        Command::Prune { admin_key, keep_days, keep_runs_per_device, dry_run } => {
            commands::prune(&url, &admin_key, keep_days, keep_runs_per_device, dry_run).await
        }
    }
}
