//! btleplug implementation of [`Transport`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use timecube_types::uuid::CONFIG_SERVICE;

use crate::device::{BtleLink, ConnectionConfig};
use crate::error::{Error, Result};
use crate::traits::{Advertisement, AdvertisementStream, Link, RadioState, Transport};
use crate::util::{Cleanup, create_identifier, format_peripheral_id, identity_matches};

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.map_err(map_permission)?;
    let adapters = manager.adapters().await.map_err(map_permission)?;

    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

fn map_permission(err: btleplug::Error) -> Error {
    match err {
        btleplug::Error::PermissionDenied => Error::PermissionDenied,
        other => Error::Bluetooth(other),
    }
}

/// The host's Bluetooth radio, via btleplug.
pub struct BtleTransport {
    adapter: Adapter,
    config: ConnectionConfig,
    scanning: AtomicBool,
}

impl std::fmt::Debug for BtleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleTransport")
            .field("config", &self.config)
            .field("scanning", &self.scanning.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl BtleTransport {
    /// Open the first adapter with default configuration.
    pub async fn new() -> Result<Self> {
        Self::with_config(ConnectionConfig::default()).await
    }

    /// Open the first adapter.
    pub async fn with_config(config: ConnectionConfig) -> Result<Self> {
        let adapter = get_adapter().await?;
        Ok(Self::from_adapter(adapter, config))
    }

    /// Wrap an adapter the caller already holds.
    pub fn from_adapter(adapter: Adapter, config: ConnectionConfig) -> Self {
        Self {
            adapter,
            config,
            scanning: AtomicBool::new(false),
        }
    }

    /// Get the connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Look for `identity` among peripherals the adapter already knows.
    async fn known_peripheral(&self, identity: &str) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            if matches_identity(&peripheral, identity).await {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    /// Find `identity`, scanning for the configuration service for up to
    /// [`ConnectionConfig::lookup_timeout`] if the adapter has not seen it yet.
    async fn find_peripheral(&self, identity: &str) -> Result<Peripheral> {
        if let Some(peripheral) = self.known_peripheral(identity).await? {
            debug!("Found device in adapter cache");
            return Ok(peripheral);
        }

        info!("Device not cached, scanning for it");
        let mut events = self.adapter.events().await?;
        let scan = if self.scanning.load(Ordering::SeqCst) {
            None
        } else {
            self.adapter
                .start_scan(ScanFilter {
                    services: vec![CONFIG_SERVICE],
                })
                .await
                .map_err(map_permission)?;
            let adapter = self.adapter.clone();
            // Stopped even if the connect timeout drops this future mid-lookup
            Some(Cleanup::new(async move {
                if let Err(e) = adapter.stop_scan().await {
                    debug!(error = %e, "Stopping lookup scan failed");
                }
            }))
        };

        let lookup = async {
            while let Some(event) = events.next().await {
                let (CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) = event
                else {
                    continue;
                };
                if let Ok(peripheral) = self.adapter.peripheral(&id).await
                    && matches_identity(&peripheral, identity).await
                {
                    return Some(peripheral);
                }
            }
            None
        };
        let limit = self.config.lookup_timeout;
        let found = timeout(limit, lookup).await.ok().flatten();

        if let Some(scan) = scan {
            scan.run().await;
        }
        found.ok_or_else(|| Error::transport(format!("device {} not found", identity)))
    }
}

async fn matches_identity(peripheral: &Peripheral, identity: &str) -> bool {
    if identity_matches(&format_peripheral_id(&peripheral.id()), identity) {
        return true;
    }
    match peripheral.properties().await {
        Ok(Some(props)) => identity_matches(&props.address.to_string(), identity),
        _ => false,
    }
}

/// Build an advertisement for a discovered peripheral.
async fn advertisement_for(adapter: &Adapter, id: &PeripheralId) -> Option<Advertisement> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(p) => p,
        Err(e) => {
            debug!("Error looking up peripheral: {}", e);
            return None;
        }
    };
    let properties = match peripheral.properties().await {
        Ok(Some(p)) => p,
        Ok(None) => return None,
        Err(e) => {
            debug!("Error reading peripheral properties: {}", e);
            return None;
        }
    };

    Some(Advertisement {
        identity: create_identifier(&properties.address.to_string(), id),
        local_name: properties.local_name,
        rssi: properties.rssi,
        // btleplug only surfaces connectable advertisers as peripherals
        connectable: true,
    })
}

#[async_trait]
impl Transport for BtleTransport {
    async fn permission_granted(&self) -> Result<bool> {
        match self.adapter.adapter_state().await {
            Err(btleplug::Error::PermissionDenied) => Ok(false),
            _ => Ok(true),
        }
    }

    async fn radio_state(&self) -> Result<RadioState> {
        let state = self.adapter.adapter_state().await.map_err(map_permission)?;
        Ok(match state {
            CentralState::PoweredOn => RadioState::PoweredOn,
            CentralState::PoweredOff => RadioState::PoweredOff,
            _ => RadioState::Unknown,
        })
    }

    async fn start_scan(&self, services: &[Uuid]) -> Result<AdvertisementStream> {
        let events = self.adapter.events().await?;
        self.adapter
            .start_scan(ScanFilter {
                services: services.to_vec(),
            })
            .await
            .map_err(map_permission)?;
        self.scanning.store(true, Ordering::SeqCst);
        info!("BLE scan started");

        let adapter = self.adapter.clone();
        let stream = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        advertisement_for(&adapter, &id).await.map(Ok)
                    }
                    _ => None,
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn stop_scan(&self) -> Result<()> {
        if self.scanning.swap(false, Ordering::SeqCst) {
            self.adapter.stop_scan().await?;
            info!("BLE scan stopped");
        }
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self), fields(identity = %identity))]
    async fn connect(&self, identity: &str) -> Result<Arc<dyn Link>> {
        let peripheral = self.find_peripheral(identity).await?;
        let link = BtleLink::open(&self.adapter, peripheral, identity.to_string(), &self.config)
            .await?;
        Ok(Arc::new(link))
    }

    async fn release(&self) -> Result<()> {
        if let Err(e) = self.stop_scan().await {
            warn!(error = %e, "Failed to stop scan while releasing the radio");
        }
        Ok(())
    }
}
