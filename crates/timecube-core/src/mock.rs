//! Mock transport for testing.
//!
//! [`MockTransport`] stands in for the radio and [`MockLink`] for one
//! TimeCube, so the protocol layer can be exercised without BLE hardware.
//!
//! # Features
//!
//! - **Failure injection**: fail a connect, or the n-th write from now
//! - **Latency simulation**: artificial delays on connect, read and write
//! - **Device scripting**: push status notifications, drop the link
//! - **Inspection**: recorded writes, subscription and disconnect counters

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use timecube_types::codec::{decode_text, encode_text};
use timecube_types::{CharacteristicRole, DeviceStatus};

use crate::error::{Error, Result};
use crate::traits::{
    Advertisement, AdvertisementStream, Link, NotificationStream, RadioState, Transport,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A mock TimeCube.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use timecube_core::{Link, MockLink};
/// use timecube_types::CharacteristicRole;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let link = Arc::new(MockLink::new("AA:BB", "TimeTracker-01"));
/// link.open();
/// link.write(CharacteristicRole::WifiSsid, "aG9tZQ==").await.unwrap();
/// assert_eq!(link.written_text(CharacteristicRole::WifiSsid).as_deref(), Some("home"));
/// # }
/// ```
pub struct MockLink {
    identity: String,
    display_name: String,
    open: AtomicBool,
    writes: Mutex<Vec<(CharacteristicRole, String)>>,
    /// Counts down on each write; the write that reaches zero fails.
    writes_until_failure: AtomicU32,
    write_latency_ms: AtomicU64,
    read_latency_ms: AtomicU64,
    status: Mutex<String>,
    notifications: broadcast::Sender<String>,
    active_subscriptions: AtomicUsize,
    disconnects: AtomicU32,
    lost: Mutex<CancellationToken>,
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("identity", &self.identity)
            .field("display_name", &self.display_name)
            .field("open", &self.is_open())
            .finish()
    }
}

impl MockLink {
    /// Create a closed mock device whose status reads `ready`.
    pub fn new(identity: &str, display_name: &str) -> Self {
        let (notifications, _) = broadcast::channel(32);
        Self {
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            open: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            writes_until_failure: AtomicU32::new(0),
            write_latency_ms: AtomicU64::new(0),
            read_latency_ms: AtomicU64::new(0),
            status: Mutex::new(encode_text(DeviceStatus::Ready.as_marker())),
            notifications,
            active_subscriptions: AtomicUsize::new(0),
            disconnects: AtomicU32::new(0),
            lost: Mutex::new(CancellationToken::new()),
        }
    }

    /// Mark the link open, as a successful connect does. Subscriptions from
    /// an earlier connection are forgotten.
    pub fn open(&self) {
        *lock(&self.lost) = CancellationToken::new();
        self.active_subscriptions.store(0, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
    }

    /// Whether the link is open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Fail the n-th write from now (1 = the next write). Fires once.
    pub fn fail_write_at(&self, n: u32) {
        self.writes_until_failure.store(n, Ordering::SeqCst);
    }

    /// Delay every write.
    pub fn set_write_latency(&self, latency: Duration) {
        self.write_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay every read.
    pub fn set_read_latency(&self, latency: Duration) {
        self.read_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Set the value returned by status reads.
    pub fn set_status(&self, status: &DeviceStatus) {
        *lock(&self.status) = encode_text(status.as_marker());
    }

    /// Emit a status notification to every current subscriber.
    pub fn notify(&self, status: &DeviceStatus) {
        self.notify_raw(&encode_text(status.as_marker()));
    }

    /// Emit a raw (already encoded) notification payload.
    pub fn notify_raw(&self, payload: &str) {
        // No subscribers is fine
        let _ = self.notifications.send(payload.to_string());
    }

    /// Simulate the device going out of range.
    pub fn drop_link(&self) {
        self.open.store(false, Ordering::SeqCst);
        lock(&self.lost).cancel();
    }

    /// Every acknowledged write, in order.
    pub fn writes(&self) -> Vec<(CharacteristicRole, String)> {
        lock(&self.writes).clone()
    }

    /// Forget recorded writes.
    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }

    /// The most recent payload written to `role`, decoded as text.
    pub fn written_text(&self, role: CharacteristicRole) -> Option<String> {
        lock(&self.writes)
            .iter()
            .rev()
            .find(|(r, _)| *r == role)
            .and_then(|(_, payload)| decode_text(payload).ok())
    }

    /// Number of status subscriptions not yet unsubscribed.
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }

    /// Number of solicited disconnects.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.writes_until_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|previous| previous == 1)
            .unwrap_or(false)
    }
}

#[async_trait]
impl Link for MockLink {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn write(&self, role: CharacteristicRole, payload: &str) -> Result<()> {
        let latency = self.write_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check_open()?;
        if self.take_injected_failure() {
            return Err(Error::transport(format!("mock write to {} rejected", role)));
        }
        lock(&self.writes).push((role, payload.to_string()));
        Ok(())
    }

    async fn read(&self, role: CharacteristicRole) -> Result<String> {
        let latency = self.read_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check_open()?;
        match role {
            CharacteristicRole::Status => Ok(lock(&self.status).clone()),
            other => Err(Error::transport(format!("{} is write-only", other))),
        }
    }

    async fn subscribe(&self, role: CharacteristicRole) -> Result<NotificationStream> {
        self.check_open()?;
        if role != CharacteristicRole::Status {
            return Err(Error::transport(format!("{} does not notify", role)));
        }
        self.active_subscriptions.fetch_add(1, Ordering::SeqCst);
        let rx = self.notifications.subscribe();
        let stream = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn unsubscribe(&self, _role: CharacteristicRole) -> Result<()> {
        let _ = self
            .active_subscriptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn closed(&self) {
        let lost = lock(&self.lost).clone();
        lost.cancelled().await;
    }
}

/// A mock radio with one connectable TimeCube in range.
///
/// # Example
///
/// ```
/// use timecube_core::{MockTransport, Transport};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let transport = MockTransport::new("AA:BB", "TimeTracker-01");
/// let link = transport.connect("AA:BB").await.unwrap();
/// assert_eq!(link.display_name(), "TimeTracker-01");
/// assert!(transport.connect("CC:DD").await.is_err());
/// # }
/// ```
pub struct MockTransport {
    link: Arc<MockLink>,
    advertisements: Mutex<Vec<Advertisement>>,
    scan_error: Mutex<Option<String>>,
    scan_filters: Mutex<Vec<Vec<Uuid>>>,
    permission: AtomicBool,
    radio_on: AtomicBool,
    scanning: AtomicBool,
    scan_stops: AtomicU32,
    fail_connect: AtomicBool,
    connect_latency_ms: AtomicU64,
    connects: AtomicU32,
    connects_in_flight: Arc<AtomicU32>,
    peak_connects_in_flight: AtomicU32,
    released: AtomicBool,
}

/// Decrements the in-flight connect count when a connect finishes or is dropped.
struct InFlight(Arc<AtomicU32>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("link", &self.link)
            .field("scanning", &self.is_scanning())
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    /// Create a radio (permitted, powered on) with one device in range that
    /// advertises itself under `display_name`.
    pub fn new(identity: &str, display_name: &str) -> Self {
        Self {
            link: Arc::new(MockLink::new(identity, display_name)),
            advertisements: Mutex::new(vec![Advertisement {
                identity: identity.to_string(),
                local_name: Some(display_name.to_string()),
                rssi: Some(-60),
                connectable: true,
            }]),
            scan_error: Mutex::new(None),
            scan_filters: Mutex::new(Vec::new()),
            permission: AtomicBool::new(true),
            radio_on: AtomicBool::new(true),
            scanning: AtomicBool::new(false),
            scan_stops: AtomicU32::new(0),
            fail_connect: AtomicBool::new(false),
            connect_latency_ms: AtomicU64::new(0),
            connects: AtomicU32::new(0),
            connects_in_flight: Arc::new(AtomicU32::new(0)),
            peak_connects_in_flight: AtomicU32::new(0),
            released: AtomicBool::new(false),
        }
    }

    /// The mock device behind every link this transport opens.
    pub fn link(&self) -> Arc<MockLink> {
        Arc::clone(&self.link)
    }

    /// Add an advertisement delivered by subsequent scans.
    pub fn advertise(&self, advertisement: Advertisement) {
        lock(&self.advertisements).push(advertisement);
    }

    /// Replace every advertisement delivered by subsequent scans.
    pub fn set_advertisements(&self, advertisements: Vec<Advertisement>) {
        *lock(&self.advertisements) = advertisements;
    }

    /// Make subsequent scans report an error after their advertisements.
    pub fn set_scan_error(&self, message: Option<&str>) {
        *lock(&self.scan_error) = message.map(str::to_string);
    }

    /// Grant or revoke Bluetooth permission.
    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    /// Power the radio on or off.
    pub fn set_radio_on(&self, on: bool) {
        self.radio_on.store(on, Ordering::SeqCst);
    }

    /// Make connects fail.
    pub fn set_connect_failure(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Delay every connect.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Whether a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Number of times the radio actually stopped a running scan.
    pub fn scan_stop_count(&self) -> u32 {
        self.scan_stops.load(Ordering::SeqCst)
    }

    /// Service filters passed to each scan start.
    pub fn scan_filters(&self) -> Vec<Vec<Uuid>> {
        lock(&self.scan_filters).clone()
    }

    /// Number of connect attempts.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Most connects that were ever running at the same time.
    pub fn peak_connects_in_flight(&self) -> u32 {
        self.peak_connects_in_flight.load(Ordering::SeqCst)
    }

    /// Whether `release()` was called.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn permission_granted(&self) -> Result<bool> {
        Ok(self.permission.load(Ordering::SeqCst))
    }

    async fn radio_state(&self) -> Result<RadioState> {
        Ok(if self.radio_on.load(Ordering::SeqCst) {
            RadioState::PoweredOn
        } else {
            RadioState::PoweredOff
        })
    }

    async fn start_scan(&self, services: &[Uuid]) -> Result<AdvertisementStream> {
        lock(&self.scan_filters).push(services.to_vec());
        self.scanning.store(true, Ordering::SeqCst);

        let advertisements: Vec<Result<Advertisement>> =
            lock(&self.advertisements).iter().cloned().map(Ok).collect();
        let error = lock(&self.scan_error)
            .clone()
            .map(|message| Err(Error::transport(message)));

        // Stays open until the consumer stops reading, like a real scan
        let stream = stream::iter(advertisements)
            .chain(stream::iter(error))
            .chain(stream::pending());
        Ok(stream.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        if self.scanning.swap(false, Ordering::SeqCst) {
            self.scan_stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn connect(&self, identity: &str) -> Result<Arc<dyn Link>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let running = self.connects_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_connects_in_flight
            .fetch_max(running, Ordering::SeqCst);
        let _in_flight = InFlight(Arc::clone(&self.connects_in_flight));
        let latency = self.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::transport("mock connect failure"));
        }
        if identity != self.link.identity() {
            return Err(Error::transport(format!("device {} not found", identity)));
        }
        self.link.open();
        Ok(self.link() as Arc<dyn Link>)
    }

    async fn release(&self) -> Result<()> {
        self.released.store(true, Ordering::SeqCst);
        self.stop_scan().await
    }
}
