//! `timecube`: provision TimeCube time-tracking devices from the command line.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Find nearby cubes in setup mode |
//! | `provision` | Send WiFi and provider credentials from a profile |
//! | `status` | Read the device's status marker |
//! | `watch` | Print status notifications as they arrive |
//! | `config` | Manage `~/.config/timecube/config.toml` |

mod cli;
mod commands;
mod config;
mod profile;
mod util;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{ProvisionArgs, cmd_config, cmd_provision, cmd_scan, cmd_status, cmd_watch};
use config::{Config, resolve_device};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();

    match cli.command {
        Commands::Scan { timeout, json } => {
            cmd_scan(config.scan_timeout(timeout), json, cli.quiet).await
        }
        Commands::Provision {
            device,
            profile,
            timeout,
            no_wait,
        } => {
            let args = ProvisionArgs {
                device: resolve_device(device.device, &config),
                connect_timeout: Duration::from_secs(device.connect_timeout),
                profile,
                status_timeout: (!no_wait).then(|| config.status_timeout(timeout)),
                write_delay: config.write_delay(),
            };
            cmd_provision(args, cli.quiet).await
        }
        Commands::Status { device, format } => {
            cmd_status(
                resolve_device(device.device, &config),
                Duration::from_secs(device.connect_timeout),
                format,
            )
            .await
        }
        Commands::Watch { device } => {
            cmd_watch(
                resolve_device(device.device, &config),
                Duration::from_secs(device.connect_timeout),
                cli.quiet,
            )
            .await
        }
        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}
