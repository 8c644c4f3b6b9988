//! Utility functions for CLI operations.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use timecube_core::{BtleTransport, ConnectionConfig, ConnectionManager, Error, ManagerConfig};

/// Get device identity, with helpful error message.
pub fn require_device(device: Option<String>) -> Result<String> {
    device.ok_or_else(|| {
        anyhow!(
            "No device specified. Use --device <ID> or set TIMECUBE_DEVICE environment variable.\n\
             Run 'timecube scan' to find nearby devices."
        )
    })
}

/// Open the Bluetooth adapter and build the process's connection manager.
pub async fn open_manager(connect_timeout: Duration) -> Result<ConnectionManager> {
    let connection = ConnectionConfig::default().connection_timeout(connect_timeout);
    let transport = BtleTransport::with_config(connection.clone())
        .await
        .map_err(|e| hint(e, "Failed to open Bluetooth adapter"))?;
    let config = ManagerConfig::default().connection(connection);
    Ok(ConnectionManager::with_config(Arc::new(transport), config))
}

/// Connect with improved error messages. Returns the device's display name.
pub async fn connect(manager: &ConnectionManager, identity: &str) -> Result<String> {
    manager
        .connect(identity)
        .await
        .map_err(|e| hint(e, &format!("Failed to connect to device: {}", identity)))?;

    match manager.current_state() {
        timecube_core::ConnectionState::Connected { display_name, .. } => Ok(display_name),
        _ => Err(anyhow!("Connection to {} dropped immediately", identity)),
    }
}

/// Close the link and release the radio, logging rather than failing.
pub async fn shutdown(manager: &ConnectionManager) {
    if let Err(e) = manager.shutdown().await {
        tracing::warn!("Failed to shut down cleanly: {}", e);
    }
}

/// Attach a suggestion for the errors users can fix themselves.
fn hint(error: Error, message: &str) -> anyhow::Error {
    let suggestion = match &error {
        Error::PermissionDenied => Some("Grant this terminal Bluetooth access in system settings"),
        Error::RadioDisabled => Some("Turn Bluetooth on"),
        Error::NoAdapter => Some("Plug in or enable a Bluetooth adapter"),
        Error::ConnectFailed { .. } => Some(
            "Make sure the cube is in setup mode and in range, \
             then run 'timecube scan' to verify its identity",
        ),
        _ => None,
    };
    let context = match suggestion {
        Some(tip) => format!("{}\n\nTip: {}", message, tip),
        None => message.to_string(),
    };
    anyhow::Error::new(error).context(context)
}

/// Print to stdout and flush
pub fn write_output(content: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(content.as_bytes())
        .context("Failed to write output")?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_device_with_some() {
        assert_eq!(
            require_device(Some("AA:BB:CC:DD:EE:FF".to_string())).unwrap(),
            "AA:BB:CC:DD:EE:FF"
        );
    }

    #[test]
    fn test_require_device_with_none() {
        let err = require_device(None).unwrap_err().to_string();
        assert!(err.contains("No device specified"));
        assert!(err.contains("TIMECUBE_DEVICE"));
    }

    #[test]
    fn test_hint_adds_tip() {
        let err = hint(Error::RadioDisabled, "Failed to scan");
        assert!(err.to_string().contains("Turn Bluetooth on"));
        assert!(format!("{:#}", err).contains("Bluetooth radio is disabled"));

        let err = hint(Error::NotConnected, "Failed to read");
        assert_eq!(err.to_string(), "Failed to read");
    }
}
