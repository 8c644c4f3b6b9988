//! Transport abstractions.
//!
//! [`Transport`] and [`Link`] are the seam between the protocol layer and the
//! radio. [`BtleTransport`](crate::BtleTransport) implements them on top of
//! btleplug, and [`MockTransport`](crate::MockTransport) implements them for
//! tests.
//!
//! Characteristic payloads cross this seam as base64 text, the form produced
//! by [`timecube_types::codec`].

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use uuid::Uuid;

use timecube_types::CharacteristicRole;

use crate::error::Result;

/// One advertisement as seen by the radio, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Stable identifier of the advertiser.
    pub identity: String,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Whether the advertiser accepts connections.
    pub connectable: bool,
}

/// Power state of the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    /// Ready to scan and connect.
    PoweredOn,
    /// Switched off by the user or the OS.
    PoweredOff,
    /// Not yet known (some stacks report this briefly at startup).
    Unknown,
}

/// Stream of raw advertisements from an active scan.
pub type AdvertisementStream = Pin<Box<dyn Stream<Item = Result<Advertisement>> + Send>>;

/// Stream of base64 notification payloads from one characteristic.
pub type NotificationStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Access to a BLE radio.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the process may use Bluetooth.
    async fn permission_granted(&self) -> Result<bool>;

    /// Current power state of the radio.
    async fn radio_state(&self) -> Result<RadioState>;

    /// Start scanning. Advertisements are delivered until [`Transport::stop_scan`].
    ///
    /// A non-empty `services` list restricts the scan to advertisers of those
    /// service UUIDs where the platform supports it.
    async fn start_scan(&self, services: &[Uuid]) -> Result<AdvertisementStream>;

    /// Stop an active scan. Stopping an idle radio is not an error.
    async fn stop_scan(&self) -> Result<()>;

    /// Open a link to the device with this identity.
    async fn connect(&self, identity: &str) -> Result<Arc<dyn Link>>;

    /// Release the radio at process shutdown.
    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// An open link to one device.
#[async_trait]
pub trait Link: Send + Sync {
    /// Identity the link was opened with.
    fn identity(&self) -> &str;

    /// Advertised name of the remote device.
    fn display_name(&self) -> &str;

    /// Write a payload and wait for the device's acknowledgment.
    async fn write(&self, role: CharacteristicRole, payload: &str) -> Result<()>;

    /// Read the current value of a characteristic.
    async fn read(&self, role: CharacteristicRole) -> Result<String>;

    /// Enable notifications and return a stream of their payloads.
    async fn subscribe(&self, role: CharacteristicRole) -> Result<NotificationStream>;

    /// Disable notifications.
    async fn unsubscribe(&self, role: CharacteristicRole) -> Result<()>;

    /// Tear the link down.
    async fn disconnect(&self) -> Result<()>;

    /// Resolves once the link is lost without a call to [`Link::disconnect`].
    async fn closed(&self);
}
