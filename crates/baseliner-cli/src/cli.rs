use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "baseliner",
    about = "Operator client for a running Baseliner control plane",
    version
)]
pub struct Cli {
    /// Base URL of the control plane to talk to.
    #[arg(long, env = "BASELINER_URL", global = true, default_value = "http://localhost:8080")]
    pub url: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mint a single-use enroll token (admin).
    MintEnrollToken {
        #[arg(long, env = "BASELINER_ADMIN_KEY")]
        admin_key: String,

        /// Free-text note for the token, shown in listings.
        #[arg(long)]
        note: Option<String>,

        #[arg(long)]
        expires_in_seconds: Option<i64>,
    },

    /// Exchange an enroll token for a device token.
    Enroll {
        #[arg(long)]
        enroll_token: String,

        /// Unique key identifying this device (e.g. a hardware serial).
        #[arg(long)]
        device_key: String,

        #[arg(long, default_value = "cli-host")]
        hostname: String,
    },

    /// Fetch the compiled effective policy for a device.
    GetPolicy {
        #[arg(long, env = "BASELINER_DEVICE_TOKEN")]
        device_token: String,
    },

    /// List enrolled devices (admin).
    ListDevices {
        #[arg(long, env = "BASELINER_ADMIN_KEY")]
        admin_key: String,

        /// Filter by device status (active, deleted).
        #[arg(long)]
        status: Option<String>,
    },

    /// Trigger a retention sweep (admin).
    Prune {
        #[arg(long, env = "BASELINER_ADMIN_KEY")]
        admin_key: String,

        #[arg(long, default_value_t = 90)]
        keep_days: i64,

        #[arg(long, default_value_t = 200)]
        keep_runs_per_device: u32,

        /// Report what would be deleted without deleting anything.
        #[arg(long)]
        dry_run: bool,
    },
}
