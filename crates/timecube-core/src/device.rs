//! btleplug implementation of [`Link`].
//!
//! A [`BtleLink`] is one open connection to a TimeCube. Payloads arrive from
//! the protocol layer as base64 text; the link decodes them to the raw bytes
//! the firmware parses and re-encodes everything it reads or is notified of.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use timecube_types::CharacteristicRole;
use timecube_types::codec::{decode_bytes, encode_bytes};
use timecube_types::uuid::CONFIG_SERVICE;

use crate::error::{Error, Result};
use crate::traits::{Link, NotificationStream};
use crate::util::Cleanup;

/// Default timeout for BLE characteristic read operations.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE characteristic write operations.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE connection operations.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time spent scanning for a device the adapter has not cached.
const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for BLE connection timeouts and behavior.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use timecube_core::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(20))
///     .disconnect_debounce(Duration::from_millis(500));
/// assert_eq!(config.write_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
    /// How long to scan for a device that is not in the adapter cache.
    pub lookup_timeout: Duration,
    /// Timeout for BLE read operations.
    pub read_timeout: Duration,
    /// Timeout for BLE write operations.
    pub write_timeout: Duration,
    /// How long a peripheral must stay disconnected before the loss is
    /// reported. Zero reports every disconnect immediately.
    pub disconnect_debounce: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            disconnect_debounce: Duration::ZERO,
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the uncached device lookup timeout.
    #[must_use]
    pub fn lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the disconnect debounce window.
    #[must_use]
    pub fn disconnect_debounce(mut self, window: Duration) -> Self {
        self.disconnect_debounce = window;
        self
    }
}

/// An open connection to a TimeCube over btleplug.
///
/// Created by [`BtleTransport::connect`](crate::BtleTransport). Call
/// [`Link::disconnect`] before dropping; a dropped link that is still open is
/// disconnected on a best-effort background task.
pub struct BtleLink {
    peripheral: Peripheral,
    identity: String,
    display_name: String,
    characteristics: HashMap<Uuid, Characteristic>,
    /// Cancelled when the peripheral goes away on its own.
    lost: CancellationToken,
    /// Set once `disconnect()` has been called.
    closing: Arc<AtomicBool>,
    watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BtleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleLink")
            .field("identity", &self.identity)
            .field("display_name", &self.display_name)
            .field("characteristics", &self.characteristics.len())
            .finish_non_exhaustive()
    }
}

impl BtleLink {
    /// Connect to `peripheral`, discover the configuration service and start
    /// watching for unsolicited disconnects.
    #[tracing::instrument(level = "info", skip_all, fields(identity = %identity))]
    pub(crate) async fn open(
        adapter: &Adapter,
        peripheral: Peripheral,
        identity: String,
        config: &ConnectionConfig,
    ) -> Result<Self> {
        // Subscribe before connecting so an early drop is not missed
        let events = adapter.events().await?;

        peripheral.connect().await?;
        let close = {
            let peripheral = peripheral.clone();
            Cleanup::new(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!(error = %e, "Disconnect after failed open also failed");
                }
            })
        };
        debug!("Connected, discovering services");

        let characteristics = discover(&peripheral, config.discovery_timeout).await?;
        let display_name = peripheral
            .properties()
            .await?
            .and_then(|p| p.local_name)
            .unwrap_or_else(|| identity.clone());
        close.disarm();

        let lost = CancellationToken::new();
        let closing = Arc::new(AtomicBool::new(false));
        let watcher = tokio::spawn(watch_disconnects(
            events,
            peripheral.clone(),
            config.disconnect_debounce,
            lost.clone(),
            Arc::clone(&closing),
        ));

        info!(display_name = %display_name, "Configuration service ready");
        Ok(Self {
            peripheral,
            identity,
            display_name,
            characteristics,
            lost,
            closing,
            watcher: std::sync::Mutex::new(Some(watcher)),
        })
    }

    fn characteristic(&self, role: CharacteristicRole) -> Result<&Characteristic> {
        self.characteristics
            .get(&role.uuid())
            .ok_or_else(|| Error::characteristic_not_found(role))
    }

    fn stop_watcher(&self) {
        let handle = match self.watcher.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Discover services and collect the configuration characteristics.
async fn discover(
    peripheral: &Peripheral,
    discovery_timeout: Duration,
) -> Result<HashMap<Uuid, Characteristic>> {
    timeout(discovery_timeout, peripheral.discover_services())
        .await
        .map_err(|_| Error::timeout("discover services", discovery_timeout))??;

    let characteristics: HashMap<Uuid, Characteristic> = peripheral
        .services()
        .into_iter()
        .filter(|service| service.uuid == CONFIG_SERVICE)
        .flat_map(|service| service.characteristics.into_iter())
        .map(|c| (c.uuid, c))
        .collect();
    debug!("Found {} configuration characteristics", characteristics.len());

    let required = CharacteristicRole::TRANSFER_ORDER
        .into_iter()
        .chain(std::iter::once(CharacteristicRole::Status));
    for role in required {
        if !characteristics.contains_key(&role.uuid()) {
            return Err(Error::characteristic_not_found(role));
        }
    }
    Ok(characteristics)
}

/// Report the first unsolicited disconnect of `peripheral`.
///
/// With a non-zero `debounce`, a disconnect only counts if the peripheral is
/// still disconnected once the window has elapsed.
async fn watch_disconnects(
    mut events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    peripheral: Peripheral,
    debounce: Duration,
    lost: CancellationToken,
    closing: Arc<AtomicBool>,
) {
    let id = peripheral.id();
    while let Some(event) = events.next().await {
        let CentralEvent::DeviceDisconnected(disconnected) = event else {
            continue;
        };
        if disconnected != id || closing.load(Ordering::SeqCst) {
            continue;
        }
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
            if peripheral.is_connected().await.unwrap_or(false) {
                debug!("Disconnect recovered within {:?}, ignoring", debounce);
                continue;
            }
        }
        // Already gone, so there is nothing left for drop() to release
        if closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Peripheral disconnected");
        lost.cancel();
        return;
    }
    debug!("Adapter event stream ended");
}

#[async_trait]
impl Link for BtleLink {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn write(&self, role: CharacteristicRole, payload: &str) -> Result<()> {
        let characteristic = self.characteristic(role)?;
        let bytes = decode_bytes(payload)?;
        debug!(%role, bytes = bytes.len(), "Writing characteristic");
        self.peripheral
            .write(characteristic, &bytes, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn read(&self, role: CharacteristicRole) -> Result<String> {
        let characteristic = self.characteristic(role)?;
        let bytes = self.peripheral.read(characteristic).await?;
        Ok(encode_bytes(&bytes))
    }

    async fn subscribe(&self, role: CharacteristicRole) -> Result<NotificationStream> {
        let characteristic = self.characteristic(role)?;
        let uuid = characteristic.uuid;
        // Take the stream first so the first notification is not lost
        let notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(characteristic).await?;

        let stream = notifications.filter_map(move |notification| {
            let payload = (notification.uuid == uuid).then(|| encode_bytes(&notification.value));
            futures::future::ready(payload)
        });
        Ok(Box::pin(stream))
    }

    async fn unsubscribe(&self, role: CharacteristicRole) -> Result<()> {
        let characteristic = self.characteristic(role)?;
        self.peripheral.unsubscribe(characteristic).await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self), fields(identity = %self.identity))]
    async fn disconnect(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.stop_watcher();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn closed(&self) {
        self.lost.cancelled().await;
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_watcher();
        warn!(
            identity = %self.identity,
            "Link dropped without calling disconnect() - performing best-effort cleanup"
        );

        let peripheral = self.peripheral.clone();
        let identity = self.identity.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!(identity = %identity, error = %e, "Best-effort disconnect failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connection_timeout, Duration::from_secs(15));
        assert_eq!(config.discovery_timeout, Duration::from_secs(10));
        assert_eq!(config.lookup_timeout, Duration::from_secs(10));
        assert_eq!(config.disconnect_debounce, Duration::ZERO);
    }

    #[test]
    fn test_connection_config_builder() {
        let config = ConnectionConfig::new()
            .read_timeout(Duration::from_secs(3))
            .write_timeout(Duration::from_secs(4))
            .discovery_timeout(Duration::from_secs(5))
            .lookup_timeout(Duration::from_secs(6))
            .disconnect_debounce(Duration::from_millis(250));
        assert_eq!(config.read_timeout, Duration::from_secs(3));
        assert_eq!(config.write_timeout, Duration::from_secs(4));
        assert_eq!(config.discovery_timeout, Duration::from_secs(5));
        assert_eq!(config.lookup_timeout, Duration::from_secs(6));
        assert_eq!(config.disconnect_debounce, Duration::from_millis(250));
    }
}
