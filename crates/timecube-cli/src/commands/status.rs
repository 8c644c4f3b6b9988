//! Status command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use timecube_core::StatusMonitor;
use timecube_types::DeviceStatus;

use crate::cli::OutputFormat;
use crate::util::{connect, open_manager, require_device, shutdown, write_output};

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    identity: &'a str,
    display_name: &'a str,
    status: &'a str,
    terminal: bool,
}

pub async fn cmd_status(
    device: Option<String>,
    connect_timeout: Duration,
    format: OutputFormat,
) -> Result<()> {
    let identity = require_device(device)?;
    let manager = open_manager(connect_timeout).await?;

    let result = async {
        let name = connect(&manager, &identity).await?;
        let status = StatusMonitor::new(manager.clone())
            .read_status()
            .await
            .context("Failed to read device status")?;
        Ok::<_, anyhow::Error>((name, status))
    }
    .await;
    shutdown(&manager).await;
    let (name, status) = result?;

    let content = match format {
        OutputFormat::Json => format_status_json(&identity, &name, &status)?,
        OutputFormat::Text => format!("{}: {}\n", name, status),
    };
    write_output(&content)
}

fn format_status_json(identity: &str, name: &str, status: &DeviceStatus) -> Result<String> {
    let report = StatusReport {
        identity,
        display_name: name,
        status: status.as_marker(),
        terminal: status.is_terminal(),
    };
    let mut out = serde_json::to_string_pretty(&report).context("Failed to serialize status")?;
    out.push('\n');
    Ok(out)
}
