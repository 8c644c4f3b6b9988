//! Scan command implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use timecube_core::{BtleTransport, ScanOptions, scan_for};
use timecube_types::DeviceDescriptor;

use crate::util::write_output;

pub async fn cmd_scan(timeout: Duration, json: bool, quiet: bool) -> Result<()> {
    if !quiet && !json {
        eprintln!("Scanning for TimeCubes ({}s)...", timeout.as_secs());
    }

    let transport = BtleTransport::new()
        .await
        .context("Failed to open Bluetooth adapter")?;
    let devices = scan_for(Arc::new(transport), ScanOptions::new().duration(timeout))
        .await
        .context("Failed to scan for devices")?;

    let content = if json {
        format_scan_json(&devices)?
    } else {
        format_scan_text(&devices, !quiet)
    };
    write_output(&content)
}

fn format_scan_json(devices: &[DeviceDescriptor]) -> Result<String> {
    let mut out = serde_json::to_string_pretty(devices).context("Failed to serialize devices")?;
    out.push('\n');
    Ok(out)
}

fn format_scan_text(devices: &[DeviceDescriptor], tips: bool) -> String {
    if devices.is_empty() {
        let mut out = String::from("No TimeCubes found.\n");
        if tips {
            out.push_str("Make sure the cube is powered on and in setup mode.\n");
        }
        return out;
    }

    let name_width = devices
        .iter()
        .map(|d| d.display_name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    // ID is the code printed on the cube's label
    let mut out = format!(
        "{:<name_width$}  {:<4}  {:<36}  RSSI\n",
        "NAME", "ID", "IDENTITY"
    );
    for device in devices {
        let rssi = device
            .signal_strength
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<name_width$}  {:<4}  {:<36}  {}\n",
            device.display_name,
            device.suffix().unwrap_or("-"),
            device.identity,
            rssi
        ));
    }
    if tips {
        out.push_str(&format!(
            "\nProvision with: timecube provision --device {} --profile <FILE>\n",
            devices[0].identity
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(identity: &str, name: &str, rssi: Option<i16>) -> DeviceDescriptor {
        DeviceDescriptor {
            identity: identity.to_string(),
            display_name: name.to_string(),
            signal_strength: rssi,
            connectable: true,
        }
    }

    #[test]
    fn test_format_scan_text() {
        let devices = [
            device("AA:BB:CC:DD:EE:FF", "TimeTracker-EEFF", Some(-61)),
            device("11:22:33:44:55:66", "TimeTracker-5566", None),
            device("22:33:44:55:66:77", "TimeTracker-", None),
        ];
        let out = format_scan_text(&devices, false);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("NAME"));
        assert!(lines[1].contains("AA:BB:CC:DD:EE:FF") && lines[1].ends_with("-61 dBm"));
        assert!(lines[2].ends_with('-'));

        let ids: Vec<_> = lines[1..]
            .iter()
            .map(|line| line.split_whitespace().nth(1).unwrap())
            .collect();
        assert_eq!(ids, ["EEFF", "5566", "-"]);
    }

    #[test]
    fn test_format_scan_text_empty() {
        assert!(format_scan_text(&[], true).contains("setup mode"));
        assert_eq!(format_scan_text(&[], false), "No TimeCubes found.\n");
    }

    #[test]
    fn test_format_scan_json() {
        let out = format_scan_json(&[device("AA:BB", "TimeTracker-01", Some(-60))]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value[0]["identity"], "AA:BB");
        assert_eq!(value[0]["display_name"], "TimeTracker-01");
        assert_eq!(value[0]["signal_strength"], -60);
    }
}
