//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reusable device connection arguments
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Device identity (MAC address or UUID), or use TIMECUBE_DEVICE env var
    #[arg(short, long, env = "TIMECUBE_DEVICE")]
    pub device: Option<String>,

    /// Connection timeout in seconds
    #[arg(short = 'T', long, default_value = "15")]
    pub connect_timeout: u64,
}

#[derive(Parser)]
#[command(name = "timecube")]
#[command(
    author,
    version,
    about = "Provision TimeCube time-tracking devices over Bluetooth",
    long_about = None
)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby TimeCubes in setup mode
    Scan {
        /// Scan duration in seconds (default: config or 10)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send WiFi and provider credentials from a profile to a device
    Provision {
        #[command(flatten)]
        device: DeviceArgs,

        /// Provisioning profile (TOML)
        #[arg(short, long)]
        profile: PathBuf,

        /// Seconds to wait for the device to confirm (default: config or 15)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Do not wait for the device to confirm
        #[arg(long)]
        no_wait: bool,
    },

    /// Read the device's current status marker
    Status {
        #[command(flatten)]
        device: DeviceArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print status notifications until Ctrl-C or the link drops
    Watch {
        #[command(flatten)]
        device: DeviceArgs,
    },

    /// Manage CLI configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Print the current configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Set the default device
    SetDevice {
        /// Device identity
        identity: String,
    },
    /// Clear the default device
    UnsetDevice,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_provision() {
        let cli = Cli::try_parse_from([
            "timecube",
            "provision",
            "--device",
            "AA:BB",
            "--profile",
            "office.toml",
            "--no-wait",
        ])
        .unwrap();
        match cli.command {
            Commands::Provision {
                device,
                profile,
                timeout,
                no_wait,
            } => {
                assert_eq!(device.device.as_deref(), Some("AA:BB"));
                assert_eq!(device.connect_timeout, 15);
                assert_eq!(profile, PathBuf::from("office.toml"));
                assert_eq!(timeout, None);
                assert!(no_wait);
            }
            _ => panic!("expected provision"),
        }
    }

    #[test]
    fn test_parse_scan_json() {
        let cli = Cli::try_parse_from(["timecube", "-q", "scan", "--json", "-t", "5"]).unwrap();
        assert!(cli.quiet);
        assert!(matches!(
            cli.command,
            Commands::Scan {
                timeout: Some(5),
                json: true
            }
        ));
    }
}
