//! Provision command implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use timecube_core::{
    ConfigurationTransfer, ConnectionManager, Error, StatusMonitor, TransferOptions,
};
use timecube_types::{CharacteristicRole, ConfigurationRecord, DeviceStatus};

use crate::config::update_last_device;
use crate::profile::Profile;
use crate::util::{connect, open_manager, require_device, shutdown};

/// Resolved arguments for `timecube provision`.
#[derive(Debug, Clone)]
pub struct ProvisionArgs {
    pub device: Option<String>,
    pub connect_timeout: Duration,
    pub profile: PathBuf,
    /// `None` skips the confirmation wait.
    pub status_timeout: Option<Duration>,
    pub write_delay: Duration,
}

pub async fn cmd_provision(args: ProvisionArgs, quiet: bool) -> Result<()> {
    let identity = require_device(args.device.clone())?;
    let record = Profile::load(&args.profile)?.to_record()?;

    let manager = open_manager(args.connect_timeout).await?;
    let result = provision(&manager, &identity, &record, &args, |role| {
        if !quiet {
            eprintln!("  sent {}", role);
        }
    })
    .await;
    shutdown(&manager).await;
    let name = result?;

    if let Err(e) = update_last_device(&identity, Some(&name)) {
        tracing::debug!("Failed to remember device: {}", e);
    }
    if !quiet {
        match args.status_timeout {
            Some(_) => eprintln!("{} is configured and online.", name),
            None => eprintln!("Configuration sent to {}.", name),
        }
    }
    Ok(())
}

/// Connect, send the record, and optionally wait for confirmation. Returns the
/// device's display name. The caller owns teardown.
async fn provision<F>(
    manager: &ConnectionManager,
    identity: &str,
    record: &ConfigurationRecord,
    args: &ProvisionArgs,
    on_sent: F,
) -> Result<String>
where
    F: FnMut(CharacteristicRole),
{
    let name = connect(manager, identity).await?;
    tracing::info!("Connected to {}", name);

    let transfer = ConfigurationTransfer::with_options(
        manager.clone(),
        TransferOptions::new().inter_write_delay(args.write_delay),
    );
    transfer
        .send_with_progress(record, on_sent)
        .await
        .map_err(|e| match e {
            Error::ConnectionLost => anyhow::Error::new(e)
                .context(format!("{} went out of range during the transfer", name)),
            other => anyhow::Error::new(other).context("Failed to send configuration"),
        })?;

    let Some(limit) = args.status_timeout else {
        return Ok(name);
    };

    tracing::info!("Waiting up to {}s for confirmation", limit.as_secs());
    let status = StatusMonitor::new(manager.clone())
        .await_any(&[DeviceStatus::ConfigSuccess, DeviceStatus::Error], limit)
        .await
        .map_err(|e| match e {
            Error::Timeout { .. } => anyhow::Error::new(e).context(format!(
                "{} did not confirm the configuration; check the WiFi credentials and try again",
                name
            )),
            other => anyhow::Error::new(other).context("Failed while waiting for confirmation"),
        })?;

    if status == DeviceStatus::Error {
        bail!("{} reported an error applying the configuration", name);
    }
    Ok(name)
}
