//! Config command implementation.

use anyhow::{Context, Result};

use crate::cli::ConfigAction;
use crate::config::Config;
use crate::util::write_output;

pub fn cmd_config(action: ConfigAction, quiet: bool) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load();
            let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            if content.trim().is_empty() {
                write_output("# No settings. Defaults are in use.\n")
            } else {
                write_output(&content)
            }
        }
        ConfigAction::Path => write_output(&format!("{}\n", Config::path().display())),
        ConfigAction::SetDevice { identity } => {
            let mut config = Config::load();
            config.device = Some(identity.clone());
            config.save()?;
            if !quiet {
                eprintln!("Default device set to {}", identity);
            }
            Ok(())
        }
        ConfigAction::UnsetDevice => {
            let mut config = Config::load();
            config.device = None;
            config.save()?;
            if !quiet {
                eprintln!("Default device cleared");
            }
            Ok(())
        }
    }
}
