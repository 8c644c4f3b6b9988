//! The single-connection state machine.
//!
//! A [`ConnectionManager`] owns the one permitted link and the process-wide
//! [`ConnectionState`]. It is created once by the application's composition
//! root and handed (by cheap clone) to every consumer that needs the link.
//!
//! State changes only through [`ConnectionManager::connect`],
//! [`ConnectionManager::disconnect`] and the transport's unsolicited
//! disconnect signal. Each change is reported to every observer exactly once.
//!
//! ```text
//!              connect()                transport ok
//! Disconnected ─────────▶ Connecting ─────────────────▶ Connected
//!      ▲                      │                             │
//!      │   transport error /  │    disconnect() / link lost │
//!      └──────────────────────┴─────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use timecube_types::{CharacteristicRole, ConnectionState};

use crate::device::ConnectionConfig;
use crate::error::{Error, Result};
use crate::events::{
    ConnectionEvent, EventDispatcher, EventReceiver, ObserverRegistry, SubscriptionHandle,
};
use crate::traits::{Link, NotificationStream, Transport};

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Timeouts applied to the link.
    pub connection: ConnectionConfig,
    /// Capacity of the async event channel.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            event_capacity: 64,
        }
    }
}

impl ManagerConfig {
    /// Set the connection configuration.
    #[must_use]
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// An open link plus the token that preempts everything running on it.
#[derive(Clone)]
pub(crate) struct Session {
    link: Arc<dyn Link>,
    cancel: CancellationToken,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Session {
    /// Run `fut`, failing with [`Error::ConnectionLost`] as soon as the link goes away.
    pub(crate) async fn guarded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::ConnectionLost),
            result = fut => match result {
                Err(_) if self.cancel.is_cancelled() => Err(Error::ConnectionLost),
                other => other,
            },
        }
    }

    pub(crate) async fn write(&self, role: CharacteristicRole, payload: &str) -> Result<()> {
        let limit = self.write_timeout;
        self.guarded(async {
            timeout(limit, self.link.write(role, payload))
                .await
                .map_err(|_| Error::timeout(format!("write {}", role), limit))?
        })
        .await
    }

    pub(crate) async fn read(&self, role: CharacteristicRole) -> Result<String> {
        let limit = self.read_timeout;
        self.guarded(async {
            timeout(limit, self.link.read(role))
                .await
                .map_err(|_| Error::timeout(format!("read {}", role), limit))?
        })
        .await
    }

    pub(crate) async fn subscribe(&self, role: CharacteristicRole) -> Result<NotificationStream> {
        self.guarded(self.link.subscribe(role)).await
    }

    pub(crate) async fn unsubscribe(&self, role: CharacteristicRole) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Err(e) = self.link.unsubscribe(role).await {
            debug!(error = %e, %role, "Unsubscribe failed");
        }
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

struct Inner {
    state: ConnectionState,
    /// Bumped on every transition out of `Connecting`/`Connected`, so stale
    /// connect completions and link-loss signals can be recognised.
    generation: u64,
    session: Option<Session>,
    /// Cancels the transport connect while `Connecting`.
    attempt: Option<CancellationToken>,
    shut_down: bool,
}

struct Shared {
    transport: Arc<dyn Transport>,
    config: ManagerConfig,
    inner: Mutex<Inner>,
    /// Held from the transport connect until the attempt is settled.
    connect_gate: tokio::sync::Mutex<()>,
    observers: ObserverRegistry,
    events: EventDispatcher,
}

/// Owner of the single permitted connection.
///
/// Cloning yields another handle to the same manager.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use timecube_core::{ConnectionManager, MockTransport};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> timecube_core::Result<()> {
/// let transport = Arc::new(MockTransport::new("AA:BB", "TimeTracker-01"));
/// let manager = ConnectionManager::new(transport);
///
/// manager.subscribe(|event| println!("connected = {}", event.connected));
/// manager.connect("AA:BB").await?;
/// assert!(manager.is_connected());
/// manager.disconnect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.current_state())
            .field("observers", &self.shared.observers.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager with default configuration.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ManagerConfig::default())
    }

    /// Create a manager with full configuration.
    pub fn with_config(transport: Arc<dyn Transport>, config: ManagerConfig) -> Self {
        let events = EventDispatcher::new(config.event_capacity);
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    session: None,
                    attempt: None,
                    shut_down: false,
                }),
                connect_gate: tokio::sync::Mutex::new(()),
                observers: ObserverRegistry::new(),
                events,
            }),
        }
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// The transport links are opened on.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.shared.transport)
    }

    /// Snapshot of the current state.
    pub fn current_state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    /// Whether a link is open.
    pub fn is_connected(&self) -> bool {
        self.lock().state.is_connected()
    }

    /// Register a synchronous observer for connection changes.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.shared.observers.subscribe(callback)
    }

    /// Remove an observer. Unknown handles are ignored.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.shared.observers.unsubscribe(handle);
    }

    /// Async receiver of the same events the observers see.
    pub fn events(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    /// Open the link to `identity`.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConnectingOrConnected`] if the state is not
    ///   `Disconnected`; the state is left unchanged.
    /// - [`Error::ShutDown`] after [`ConnectionManager::shutdown`].
    /// - [`Error::ConnectFailed`] if the transport fails or times out; the
    ///   state is back to `Disconnected`.
    /// - [`Error::ConnectionLost`] if [`ConnectionManager::disconnect`] was
    ///   called while the connect was in flight. The transport connect is
    ///   dropped at that point, so it never overlaps a later attempt.
    #[tracing::instrument(level = "info", skip(self), fields(identity = %identity))]
    pub async fn connect(&self, identity: &str) -> Result<()> {
        let (generation, attempt) = {
            let mut inner = self.lock();
            if inner.shut_down {
                return Err(Error::ShutDown);
            }
            if !inner.state.is_disconnected() {
                return Err(Error::AlreadyConnectingOrConnected);
            }
            let attempt = CancellationToken::new();
            inner.state = ConnectionState::Connecting;
            inner.generation += 1;
            inner.attempt = Some(attempt.clone());
            (inner.generation, attempt)
        };

        info!("Connecting...");
        // A cancelled attempt still owns the gate until its task drops the
        // transport future
        let _gate = tokio::select! {
            biased;
            _ = attempt.cancelled() => return Err(Error::ConnectionLost),
            gate = self.shared.connect_gate.lock() => gate,
        };
        let limit = self.shared.config.connection.connection_timeout;
        let result = tokio::select! {
            biased;
            _ = attempt.cancelled() => {
                debug!("Connect cancelled by disconnect");
                return Err(Error::ConnectionLost);
            }
            result = timeout(limit, self.shared.transport.connect(identity)) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::timeout("connect", limit)),
            },
        };

        match result {
            Ok(link) => self.complete_connect(generation, identity, link).await,
            Err(e) => {
                warn!(error = %e, "Connect failed");
                self.abort_connect(generation);
                Err(Error::connect_failed(identity, e))
            }
        }
    }

    async fn complete_connect(
        &self,
        generation: u64,
        identity: &str,
        link: Arc<dyn Link>,
    ) -> Result<()> {
        let display_name = link.display_name().to_string();
        let cancel = CancellationToken::new();
        let connection = &self.shared.config.connection;
        let session = Session {
            link: Arc::clone(&link),
            cancel: cancel.clone(),
            read_timeout: connection.read_timeout,
            write_timeout: connection.write_timeout,
        };

        let accepted = {
            let mut inner = self.lock();
            if inner.generation == generation && matches!(inner.state, ConnectionState::Connecting)
            {
                inner.state = ConnectionState::Connected {
                    identity: identity.to_string(),
                    display_name: display_name.clone(),
                };
                inner.session = Some(session);
                inner.attempt = None;
                true
            } else {
                false
            }
        };

        if !accepted {
            debug!("Connect superseded by disconnect, closing new link");
            if let Err(e) = link.disconnect().await {
                debug!(error = %e, "Closing superseded link failed");
            }
            return Err(Error::ConnectionLost);
        }

        self.watch_link(generation, link, cancel);
        info!(display_name = %display_name, "Connected");
        self.broadcast(ConnectionEvent::connected(display_name));
        Ok(())
    }

    fn abort_connect(&self, generation: u64) {
        let changed = {
            let mut inner = self.lock();
            if inner.generation == generation && matches!(inner.state, ConnectionState::Connecting)
            {
                inner.state = ConnectionState::Disconnected;
                inner.attempt = None;
                true
            } else {
                false
            }
        };
        if changed {
            self.broadcast(ConnectionEvent::disconnected());
        }
    }

    fn watch_link(&self, generation: u64, link: Arc<dyn Link>, cancel: CancellationToken) {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = link.closed() => {
                    if let Some(shared) = shared.upgrade() {
                        ConnectionManager { shared }.on_link_lost(generation);
                    }
                }
            }
        });
    }

    fn on_link_lost(&self, generation: u64) {
        let session = {
            let mut inner = self.lock();
            if inner.generation != generation || !inner.state.is_connected() {
                return;
            }
            inner.state = ConnectionState::Disconnected;
            inner.generation += 1;
            inner.session.take()
        };
        if let Some(session) = session {
            session.cancel.cancel();
        }
        warn!("Link lost");
        self.broadcast(ConnectionEvent::disconnected());
    }

    /// Tear down the link if one exists. Idempotent.
    ///
    /// Any in-flight write, read or status wait fails with
    /// [`Error::ConnectionLost`]. Observers are notified only if the state
    /// actually changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DisconnectFailed`] if the transport reports an error
    /// while closing; the state is `Disconnected` regardless.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let (session, changed) = {
            let mut inner = self.lock();
            let changed = !inner.state.is_disconnected();
            inner.state = ConnectionState::Disconnected;
            inner.generation += 1;
            if let Some(attempt) = inner.attempt.take() {
                attempt.cancel();
            }
            (inner.session.take(), changed)
        };

        if let Some(session) = &session {
            session.cancel.cancel();
        }
        if changed {
            info!("Disconnected");
            self.broadcast(ConnectionEvent::disconnected());
        }

        let Some(session) = session else {
            return Ok(());
        };
        let limit = self.shared.config.connection.connection_timeout;
        match timeout(limit, session.link.disconnect()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::DisconnectFailed(e.to_string())),
            Err(_) => Err(Error::DisconnectFailed(format!(
                "transport did not close the link within {:?}",
                limit
            ))),
        }
    }

    /// Process-level teardown: disconnect, release the radio, and refuse
    /// further connects.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        self.lock().shut_down = true;
        let disconnected = self.disconnect().await;
        self.shared.transport.release().await?;
        disconnected
    }

    /// The open session, if the state is `Connected`.
    pub(crate) fn session(&self) -> Result<Session> {
        let inner = self.lock();
        match (&inner.state, &inner.session) {
            (ConnectionState::Connected { .. }, Some(session)) => Ok(session.clone()),
            _ => Err(Error::NotConnected),
        }
    }

    fn broadcast(&self, event: ConnectionEvent) {
        self.shared.observers.notify(&event);
        self.shared.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (Arc<MockTransport>, ConnectionManager) {
        let transport = Arc::new(MockTransport::new("AA:BB", "TimeTracker-01"));
        let manager = ConnectionManager::new(transport.clone());
        (transport, manager)
    }

    fn recorder(manager: &ConnectionManager) -> Arc<Mutex<Vec<ConnectionEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        manager.subscribe(move |event| l.lock().unwrap().push(event.clone()));
        log
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (_, manager) = setup();
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
        assert!(matches!(manager.session(), Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_broadcasts_name() {
        let (_, manager) = setup();
        let log = recorder(&manager);

        manager.connect("AA:BB").await.unwrap();

        assert_eq!(
            manager.current_state(),
            ConnectionState::Connected {
                identity: "AA:BB".to_string(),
                display_name: "TimeTracker-01".to_string(),
            }
        );
        assert_eq!(
            *log.lock().unwrap(),
            vec![ConnectionEvent::connected("TimeTracker-01")]
        );
    }

    #[tokio::test]
    async fn test_connect_while_connected_fails_fast() {
        let (transport, manager) = setup();
        manager.connect("AA:BB").await.unwrap();
        let before = manager.current_state();

        let result = manager.connect("AA:BB").await;
        assert!(matches!(result, Err(Error::AlreadyConnectingOrConnected)));
        assert_eq!(manager.current_state(), before);
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connecting_fails_fast() {
        let (transport, manager) = setup();
        transport.set_connect_latency(Duration::from_millis(500));

        let m = manager.clone();
        let pending = tokio::spawn(async move { m.connect("AA:BB").await });
        tokio::task::yield_now().await;
        assert_eq!(manager.current_state(), ConnectionState::Connecting);

        let result = manager.connect("AA:BB").await;
        assert!(matches!(result, Err(Error::AlreadyConnectingOrConnected)));
        assert_eq!(manager.current_state(), ConnectionState::Connecting);

        pending.await.unwrap().unwrap();
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let (transport, manager) = setup();
        transport.set_connect_failure(true);
        let log = recorder(&manager);

        let result = manager.connect("AA:BB").await;
        assert!(
            matches!(result, Err(Error::ConnectFailed { ref identity, .. }) if identity == "AA:BB")
        );
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert_eq!(*log.lock().unwrap(), vec![ConnectionEvent::disconnected()]);

        transport.set_connect_failure(false);
        manager.connect("AA:BB").await.unwrap();
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let transport = Arc::new(MockTransport::new("AA:BB", "TimeTracker-01"));
        transport.set_connect_latency(Duration::from_secs(60));
        let config = ManagerConfig::default()
            .connection(ConnectionConfig::default().connection_timeout(Duration::from_secs(2)));
        let manager = ConnectionManager::with_config(transport, config);

        let err = manager.connect("AA:BB").await.unwrap_err();
        match err {
            Error::ConnectFailed { reason, .. } => {
                assert!(matches!(*reason, Error::Timeout { .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(manager.current_state().is_disconnected());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (transport, manager) = setup();
        let log = recorder(&manager);

        manager.disconnect().await.unwrap();
        assert!(log.lock().unwrap().is_empty());

        manager.connect("AA:BB").await.unwrap();
        manager.disconnect().await.unwrap();
        manager.disconnect().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                ConnectionEvent::connected("TimeTracker-01"),
                ConnectionEvent::disconnected(),
            ]
        );
        assert_eq!(transport.link().disconnect_count(), 1);
        assert!(manager.current_state().is_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connecting() {
        let (transport, manager) = setup();
        transport.set_connect_latency(Duration::from_millis(500));
        let log = recorder(&manager);

        let m = manager.clone();
        let pending = tokio::spawn(async move { m.connect("AA:BB").await });
        tokio::task::yield_now().await;

        manager.disconnect().await.unwrap();
        assert!(manager.current_state().is_disconnected());

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::ConnectionLost)));
        assert!(manager.current_state().is_disconnected());
        assert_eq!(*log.lock().unwrap(), vec![ConnectionEvent::disconnected()]);
        assert!(!transport.link().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_drops_pending_transport_connect() {
        let (transport, manager) = setup();
        transport.set_connect_latency(Duration::from_millis(500));

        let m = manager.clone();
        let first = tokio::spawn(async move { m.connect("AA:BB").await });
        tokio::task::yield_now().await;
        manager.disconnect().await.unwrap();

        transport.set_connect_latency(Duration::from_millis(50));
        manager.connect("AA:BB").await.unwrap();
        assert!(matches!(first.await.unwrap(), Err(Error::ConnectionLost)));

        // Past the point where the first attempt would have finished
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.peak_connects_in_flight(), 1);
        assert_eq!(transport.connect_count(), 2);
        assert!(manager.is_connected());
        assert!(transport.link().is_open());
        assert!(manager.session().is_ok());
    }

    #[tokio::test]
    async fn test_unsolicited_disconnect_notifies_each_observer_once() {
        let (transport, manager) = setup();
        manager.connect("AA:BB").await.unwrap();

        let disconnects = Arc::new(AtomicUsize::new(0));
        let self_handle = Arc::new(Mutex::new(None));

        // Unsubscribes itself from inside its own callback
        let d = Arc::clone(&disconnects);
        let h = Arc::clone(&self_handle);
        let m = manager.clone();
        let handle = manager.subscribe(move |event| {
            if !event.connected {
                d.fetch_add(1, Ordering::SeqCst);
            }
            if let Some(handle) = h.lock().unwrap().take() {
                m.unsubscribe(handle);
            }
        });
        *self_handle.lock().unwrap() = Some(handle);

        let d = Arc::clone(&disconnects);
        manager.subscribe(move |event| {
            if !event.connected {
                d.fetch_add(1, Ordering::SeqCst);
            }
        });

        let mut events = manager.events();
        transport.link().drop_link();
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::disconnected());

        assert!(manager.current_state().is_disconnected());
        assert_eq!(disconnects.load(Ordering::SeqCst), 2);

        // A later explicit disconnect is a no-op
        manager.disconnect().await.unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_observer_can_read_state() {
        let (_, manager) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let m = manager.clone();
        manager.subscribe(move |_| s.lock().unwrap().push(m.current_state().is_connected()));

        manager.connect("AA:BB").await.unwrap();
        manager.disconnect().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_reconnect_after_link_loss() {
        let (transport, manager) = setup();
        manager.connect("AA:BB").await.unwrap();

        let mut events = manager.events();
        transport.link().drop_link();
        events.recv().await.unwrap();

        manager.connect("AA:BB").await.unwrap();
        assert!(manager.is_connected());
        assert!(manager.session().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_refuses_connect() {
        let (transport, manager) = setup();
        manager.connect("AA:BB").await.unwrap();

        manager.shutdown().await.unwrap();
        assert!(manager.current_state().is_disconnected());
        assert!(transport.is_released());
        assert!(matches!(
            manager.connect("AA:BB").await,
            Err(Error::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let (_, manager) = setup();
        let other = manager.clone();
        manager.connect("AA:BB").await.unwrap();
        assert!(other.is_connected());
        other.disconnect().await.unwrap();
        assert!(!manager.is_connected());
    }
}
