//! Device discovery.
//!
//! A [`DiscoverySession`] wraps the transport's scan, keeps only
//! advertisements whose name carries the TimeCube prefix, and reports each
//! device once per session. The session has no timeout of its own: the
//! caller stops it through its [`ScanHandle`], or uses [`scan_for`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use timecube_types::DeviceDescriptor;
use timecube_types::uuid::{CONFIG_SERVICE, DEVICE_NAME_PREFIX};

use crate::error::{Error, Result};
use crate::traits::{Advertisement, RadioState, Transport};

/// Options for a discovery session.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// How long [`scan_for`] keeps the session open.
    pub duration: Duration,
    /// Required prefix of the advertised name.
    pub name_prefix: String,
    /// Ask the radio to report only devices advertising the configuration
    /// service. The name filter applies either way.
    pub use_service_filter: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            name_prefix: DEVICE_NAME_PREFIX.to_string(),
            use_service_filter: true,
        }
    }
}

impl ScanOptions {
    /// Create new scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan duration.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the scan duration in seconds.
    #[must_use]
    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.duration = Duration::from_secs(secs);
        self
    }

    /// Set the required name prefix.
    #[must_use]
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Enable or disable the radio-level service filter.
    #[must_use]
    pub fn use_service_filter(mut self, enabled: bool) -> Self {
        self.use_service_filter = enabled;
        self
    }
}

fn descriptor_for(advertisement: Advertisement, prefix: &str) -> Option<DeviceDescriptor> {
    let name = advertisement.local_name?;
    if !name.starts_with(prefix) {
        return None;
    }
    Some(DeviceDescriptor {
        identity: advertisement.identity,
        display_name: name,
        signal_strength: advertisement.rssi,
        connectable: advertisement.connectable,
    })
}

/// Entry point for discovery.
#[derive(Debug)]
pub struct DiscoverySession;

impl DiscoverySession {
    /// Start scanning.
    ///
    /// `on_found` is called once per newly seen device. `on_error` is called if
    /// the radio reports an error, after which no more devices are reported.
    /// Both run on a background task.
    ///
    /// # Errors
    ///
    /// [`Error::PermissionDenied`] or [`Error::RadioDisabled`] if the
    /// preconditions do not hold; the radio scan is not started.
    #[tracing::instrument(level = "info", skip_all, fields(prefix = %options.name_prefix))]
    pub async fn start<F, E>(
        transport: Arc<dyn Transport>,
        options: ScanOptions,
        mut on_found: F,
        mut on_error: E,
    ) -> Result<ScanHandle>
    where
        F: FnMut(DeviceDescriptor) + Send + 'static,
        E: FnMut(Error) + Send + 'static,
    {
        if !transport.permission_granted().await? {
            return Err(Error::PermissionDenied);
        }
        match transport.radio_state().await? {
            RadioState::PoweredOn => {}
            state => {
                debug!(?state, "Radio not powered on");
                return Err(Error::RadioDisabled);
            }
        }

        let services: &[uuid::Uuid] = if options.use_service_filter {
            &[CONFIG_SERVICE]
        } else {
            &[]
        };
        let mut advertisements = transport.start_scan(services).await?;
        info!("Discovery started");

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let prefix = options.name_prefix;
        let task = tokio::spawn(async move {
            let mut seen = HashSet::new();
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    item = advertisements.next() => match item {
                        Some(Ok(advertisement)) => {
                            if let Some(device) = descriptor_for(advertisement, &prefix)
                                && seen.insert(device.identity.clone())
                            {
                                debug!(
                                    identity = %device.identity,
                                    name = %device.display_name,
                                    "Found device"
                                );
                                on_found(device);
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Scan error");
                            on_error(e);
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!(found = seen.len(), "Discovery task finished");
        });

        Ok(ScanHandle {
            transport,
            cancel,
            active: AtomicBool::new(true),
            task: Mutex::new(Some(task)),
        })
    }
}

/// A running discovery session.
///
/// Dropping the handle without calling [`ScanHandle::stop`] stops the radio
/// scan on a best-effort basis.
pub struct ScanHandle {
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    active: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ScanHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanHandle")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl ScanHandle {
    /// Whether [`ScanHandle::stop`] has not been called yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop the session. Idempotent.
    ///
    /// Once this returns, no more callbacks run.
    pub async fn stop(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Discovery task panicked");
        }
        self.transport.stop_scan().await?;
        info!("Discovery stopped");
        Ok(())
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let transport = Arc::clone(&self.transport);
            runtime.spawn(async move {
                if let Err(e) = transport.stop_scan().await {
                    debug!(error = %e, "Stopping abandoned scan failed");
                }
            });
        }
    }
}

/// Run a discovery session for `options.duration` and return every device
/// found.
///
/// A radio error ends the session early. It is returned only if nothing was
/// found before it.
pub async fn scan_for(
    transport: Arc<dyn Transport>,
    options: ScanOptions,
) -> Result<Vec<DeviceDescriptor>> {
    let duration = options.duration;
    let found = Arc::new(Mutex::new(Vec::new()));
    let (error_tx, error_rx) = oneshot::channel();
    let mut error_tx = Some(error_tx);

    let sink = Arc::clone(&found);
    let handle = DiscoverySession::start(
        transport,
        options,
        move |device| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(device)
        },
        move |e| {
            if let Some(tx) = error_tx.take() {
                let _ = tx.send(e);
            }
        },
    )
    .await?;

    let scan_error = tokio::select! {
        _ = tokio::time::sleep(duration) => None,
        Ok(e) = error_rx => Some(e),
    };
    handle.stop().await?;

    let devices = std::mem::take(&mut *found.lock().unwrap_or_else(PoisonError::into_inner));
    match scan_error {
        Some(e) if devices.is_empty() => Err(e),
        Some(e) => {
            warn!(error = %e, found = devices.len(), "Scan ended early");
            Ok(devices)
        }
        None => {
            info!(found = devices.len(), "Scan complete");
            Ok(devices)
        }
    }
}
