//! Bluetooth UUIDs for TimeCube devices.
//!
//! The firmware allocates the configuration service and its characteristics
//! from one base UUID, `6ba7b8xx-9dad-11d1-80b4-00c04fd430c8`, with an
//! incrementing `xx` byte. These values must match the firmware exactly.

use uuid::{Uuid, uuid};

// --- Configuration Service ---

/// TimeCube configuration service UUID (base + 0x10).
pub const CONFIG_SERVICE: Uuid = uuid!("6ba7b810-9dad-11d1-80b4-00c04fd430c8");

/// Prefix every TimeCube advertises in its local name.
///
/// The firmware appends the last four hex digits of the MAC address,
/// e.g. `TimeTracker-1A2B`.
pub const DEVICE_NAME_PREFIX: &str = "TimeTracker-";

// --- Configuration Characteristic UUIDs ---

/// WiFi SSID characteristic (write, 64 byte buffer).
pub const WIFI_SSID: Uuid = uuid!("6ba7b811-9dad-11d1-80b4-00c04fd430c8");

/// WiFi password characteristic (write, 64 byte buffer).
pub const WIFI_PASSWORD: Uuid = uuid!("6ba7b812-9dad-11d1-80b4-00c04fd430c8");

/// Time-tracking provider API token characteristic (write, 128 byte buffer).
pub const PROVIDER_TOKEN: Uuid = uuid!("6ba7b813-9dad-11d1-80b4-00c04fd430c8");

/// Provider workspace ID characteristic (write, 16 byte buffer).
pub const WORKSPACE_ID: Uuid = uuid!("6ba7b814-9dad-11d1-80b4-00c04fd430c8");

/// Project assignment block characteristic (write, exactly 24 bytes).
pub const PROJECT_IDS: Uuid = uuid!("6ba7b815-9dad-11d1-80b4-00c04fd430c8");

/// Status characteristic (read + notify, 32 byte buffer).
pub const STATUS: Uuid = uuid!("6ba7b816-9dad-11d1-80b4-00c04fd430c8");
