//! Core BLE library for TimeCube time-tracking devices.
//!
//! This crate implements the provisioning protocol: finding a cube, holding
//! the one permitted connection to it, writing WiFi and provider credentials
//! to its configuration characteristics, and waiting for the device to
//! confirm it applied them.
//!
//! # Features
//!
//! - **Discovery**: scan for advertisers named `TimeTracker-*`, de-duplicated per session
//! - **Single connection**: an explicit `Disconnected | Connecting | Connected` state machine
//! - **Change events**: synchronous observers plus an async broadcast channel
//! - **Configuration transfer**: five ordered, acknowledged writes
//! - **Status confirmation**: wait for a status marker with a timeout
//! - **Mock transport**: drive the whole protocol in tests without hardware
//!
//! # Platform Differences
//!
//! Device identities vary by platform:
//!
//! - **macOS**: a CoreBluetooth UUID, stable per host but not the MAC address.
//! - **Linux/Windows**: the MAC address (e.g. `AA:BB:CC:DD:EE:FF`).
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use timecube_core::{
//!     BtleTransport, ConfigurationTransfer, ConnectionManager, ScanOptions, StatusMonitor,
//!     scan_for,
//! };
//! use timecube_types::{
//!     ConfigurationRecord, DeviceStatus, ProjectAssignments, ProviderCredentials,
//!     WifiCredentials,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(BtleTransport::new().await?);
//!     let devices = scan_for(transport.clone(), ScanOptions::default()).await?;
//!     let Some(device) = devices.first() else {
//!         return Ok(());
//!     };
//!
//!     let manager = ConnectionManager::new(transport);
//!     manager.connect(&device.identity).await?;
//!
//!     let record = ConfigurationRecord::new(
//!         WifiCredentials { ssid: "home".into(), password: "secret".into() },
//!         ProviderCredentials { token: "tok".into(), workspace_id: "42".into() },
//!         ProjectAssignments { face_down: 10, ..Default::default() },
//!     );
//!     ConfigurationTransfer::new(manager.clone()).send(&record).await?;
//!     StatusMonitor::new(manager.clone())
//!         .await_status(DeviceStatus::ConfigSuccess, Duration::from_secs(15))
//!         .await?;
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod device;
pub mod error;
pub mod events;
pub mod manager;
pub mod mock;
pub mod scan;
pub mod status;
pub mod traits;
pub mod transfer;
pub mod transport;
pub mod util;

pub use timecube_types::types;
pub use timecube_types::uuid;

// Core exports
pub use device::{BtleLink, ConnectionConfig};
pub use error::{Error, Result};
pub use events::{ConnectionEvent, EventReceiver, ObserverRegistry, SubscriptionHandle};
pub use manager::{ConnectionManager, ManagerConfig};
pub use mock::{MockLink, MockTransport};
pub use scan::{DiscoverySession, ScanHandle, ScanOptions, scan_for};
pub use status::{StatusMonitor, StatusStream};
pub use traits::{
    Advertisement, AdvertisementStream, Link, NotificationStream, RadioState, Transport,
};
pub use transfer::{ConfigurationTransfer, TransferOptions};
pub use transport::{BtleTransport, get_adapter};
pub use util::{create_identifier, format_peripheral_id, identity_matches};

// Re-export from timecube-types
pub use timecube_types::uuid as uuids;
pub use timecube_types::{
    CharacteristicRole, ConfigurationRecord, ConnectionState, DecodeError, DeviceDescriptor,
    DeviceStatus, Orientation, ProjectAssignments, ProviderCredentials, WifiCredentials,
};
