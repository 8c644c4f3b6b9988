//! Status confirmation.
//!
//! The device reports its provisioning progress as notifications on the
//! status characteristic. [`StatusMonitor::await_status`] is the single-shot
//! "wait for this marker or time out" primitive used to confirm that a
//! transfer was applied; [`StatusMonitor::watch`] streams every marker.

use std::pin::Pin;
use std::time::Duration;

use futures::stream::{Stream, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info};

use timecube_types::codec::decode_text;
use timecube_types::{CharacteristicRole, DeviceStatus};

use crate::error::{Error, Result};
use crate::manager::ConnectionManager;
use crate::traits::NotificationStream;

/// Stream of decoded status markers. Ends when the link goes away.
pub type StatusStream = Pin<Box<dyn Stream<Item = DeviceStatus> + Send>>;

fn decode_status(payload: &str) -> Result<DeviceStatus> {
    let marker = decode_text(payload)?;
    Ok(DeviceStatus::from_marker(&marker))
}

async fn next_match(
    notifications: &mut NotificationStream,
    targets: &[DeviceStatus],
) -> Option<DeviceStatus> {
    while let Some(payload) = notifications.next().await {
        match decode_status(&payload) {
            Ok(status) if targets.contains(&status) => return Some(status),
            Ok(status) => debug!(%status, "Intermediate status"),
            Err(e) => debug!(error = %e, "Ignoring undecodable status payload"),
        }
    }
    None
}

/// Observes the status characteristic of the manager's link.
#[derive(Debug, Clone)]
pub struct StatusMonitor {
    manager: ConnectionManager,
}

impl StatusMonitor {
    /// Create a monitor over `manager`'s link.
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Wait until the device reports `target`.
    ///
    /// Other markers are ignored. The notification subscription is released
    /// before this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if `target` is not reported within `limit`.
    /// - [`Error::ConnectionLost`] if the link goes away first.
    /// - [`Error::NotConnected`] if no link is open.
    pub async fn await_status(&self, target: DeviceStatus, limit: Duration) -> Result<()> {
        self.await_any(std::slice::from_ref(&target), limit)
            .await
            .map(|_| ())
    }

    /// Wait until the device reports any of `targets`, returning the one seen.
    #[tracing::instrument(level = "info", skip(self, targets), fields(targets = targets.len()))]
    pub async fn await_any(
        &self,
        targets: &[DeviceStatus],
        limit: Duration,
    ) -> Result<DeviceStatus> {
        let session = self.manager.session()?;
        let cancel = session.cancellation();
        let mut notifications = session.subscribe(CharacteristicRole::Status).await?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::ConnectionLost),
            found = timeout(limit, next_match(&mut notifications, targets)) => match found {
                Ok(Some(status)) => Ok(status),
                // Notification stream closed under us
                Ok(None) => Err(Error::ConnectionLost),
                Err(_) => Err(Error::timeout(
                    format!("await status {}", describe(targets)),
                    limit,
                )),
            },
        };

        drop(notifications);
        session.unsubscribe(CharacteristicRole::Status).await;

        match &outcome {
            Ok(status) => info!(%status, "Status confirmed"),
            Err(e) => debug!(error = %e, "Status wait ended"),
        }
        outcome
    }

    /// Read the current status marker.
    pub async fn read_status(&self) -> Result<DeviceStatus> {
        let session = self.manager.session()?;
        let payload = session.read(CharacteristicRole::Status).await?;
        decode_status(&payload)
    }

    /// Stream every status marker until the link goes away.
    ///
    /// Undecodable payloads are skipped.
    pub async fn watch(&self) -> Result<StatusStream> {
        let session = self.manager.session()?;
        let cancel = session.cancellation();
        let notifications = session.subscribe(CharacteristicRole::Status).await?;

        let statuses = notifications
            .filter_map(|payload| async move { decode_status(&payload).ok() })
            .take_until(async move { cancel.cancelled().await });
        Ok(Box::pin(statuses))
    }

    /// Release the subscription taken by [`StatusMonitor::watch`].
    pub async fn unwatch(&self) -> Result<()> {
        let session = self.manager.session()?;
        session.unsubscribe(CharacteristicRole::Status).await;
        Ok(())
    }
}

fn describe(targets: &[DeviceStatus]) -> String {
    targets
        .iter()
        .map(DeviceStatus::as_marker)
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockLink, MockTransport};
    use std::sync::Arc;

    async fn connected() -> (Arc<MockLink>, ConnectionManager) {
        let transport = Arc::new(MockTransport::new("AA:BB", "TimeTracker-01"));
        let manager = ConnectionManager::new(transport.clone());
        manager.connect("AA:BB").await.unwrap();
        (transport.link(), manager)
    }

    async fn until_subscribed(link: &MockLink) {
        while link.active_subscriptions() == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_status_times_out() {
        let (link, manager) = connected().await;
        let monitor = StatusMonitor::new(manager);

        let err = monitor
            .await_status(DeviceStatus::ConfigSuccess, Duration::from_millis(200))
            .await
            .unwrap_err();

        match err {
            Error::Timeout {
                operation,
                duration,
            } => {
                assert_eq!(operation, "await status config_success");
                assert_eq!(duration, Duration::from_millis(200));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(link.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_await_status_ignores_other_markers() {
        let (link, manager) = connected().await;
        let monitor = StatusMonitor::new(manager);

        let pending = tokio::spawn(async move {
            monitor
                .await_status(DeviceStatus::ConfigSuccess, Duration::from_secs(15))
                .await
        });
        until_subscribed(&link).await;

        link.notify(&DeviceStatus::ConfigComplete);
        link.notify_raw("not base64!");
        link.notify(&DeviceStatus::Error);
        link.notify(&DeviceStatus::ConfigSuccess);

        pending.await.unwrap().unwrap();
        assert_eq!(link.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_await_any_returns_match() {
        let (link, manager) = connected().await;
        let monitor = StatusMonitor::new(manager);

        let pending = tokio::spawn(async move {
            monitor
                .await_any(
                    &[DeviceStatus::ConfigSuccess, DeviceStatus::Error],
                    Duration::from_secs(15),
                )
                .await
        });
        until_subscribed(&link).await;
        link.notify(&DeviceStatus::SsidReceived);
        link.notify(&DeviceStatus::Error);

        assert_eq!(pending.await.unwrap().unwrap(), DeviceStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_status_link_lost() {
        let (link, manager) = connected().await;
        let monitor = StatusMonitor::new(manager.clone());

        let pending = tokio::spawn(async move {
            monitor
                .await_status(DeviceStatus::ConfigSuccess, Duration::from_secs(15))
                .await
        });
        until_subscribed(&link).await;
        link.drop_link();

        assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionLost)));
        assert!(manager.current_state().is_disconnected());
    }

    #[tokio::test]
    async fn test_await_status_caller_disconnect() {
        let (link, manager) = connected().await;
        let monitor = StatusMonitor::new(manager.clone());

        let pending = tokio::spawn(async move {
            monitor
                .await_status(DeviceStatus::ConfigSuccess, Duration::from_secs(15))
                .await
        });
        until_subscribed(&link).await;
        manager.disconnect().await.unwrap();

        assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionLost)));
    }

    #[tokio::test]
    async fn test_await_status_not_connected() {
        let transport = Arc::new(MockTransport::new("AA:BB", "TimeTracker-01"));
        let monitor = StatusMonitor::new(ConnectionManager::new(transport.clone()));

        let result = monitor
            .await_status(DeviceStatus::ConfigSuccess, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(transport.link().active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_read_status() {
        let (link, manager) = connected().await;
        let monitor = StatusMonitor::new(manager);

        assert_eq!(monitor.read_status().await.unwrap(), DeviceStatus::Ready);
        link.set_status(&DeviceStatus::SetupMode);
        assert_eq!(monitor.read_status().await.unwrap(), DeviceStatus::SetupMode);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_in_flight_fails_on_link_loss() {
        let (link, manager) = connected().await;
        link.set_read_latency(Duration::from_secs(5));
        let monitor = StatusMonitor::new(manager.clone());

        let started = tokio::time::Instant::now();
        let pending = tokio::spawn(async move { monitor.read_status().await });
        tokio::task::yield_now().await;
        link.drop_link();

        assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionLost)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(manager.current_state().is_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_in_flight_fails_on_disconnect() {
        let (link, manager) = connected().await;
        link.set_read_latency(Duration::from_secs(5));
        let monitor = StatusMonitor::new(manager.clone());

        let started = tokio::time::Instant::now();
        let pending = tokio::spawn(async move { monitor.read_status().await });
        tokio::task::yield_now().await;
        manager.disconnect().await.unwrap();

        assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionLost)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_watch_ends_on_link_loss() {
        let (link, manager) = connected().await;
        let monitor = StatusMonitor::new(manager);

        let mut statuses = monitor.watch().await.unwrap();
        link.notify(&DeviceStatus::SsidReceived);
        link.notify(&DeviceStatus::PasswordReceived);

        assert_eq!(statuses.next().await, Some(DeviceStatus::SsidReceived));
        assert_eq!(statuses.next().await, Some(DeviceStatus::PasswordReceived));

        link.drop_link();
        assert_eq!(statuses.next().await, None);
    }
}
