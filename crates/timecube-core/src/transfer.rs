//! Configuration transfer.
//!
//! Writes one [`ConfigurationRecord`] to the connected device as five
//! acknowledged characteristic writes, strictly one after another, in
//! [`CharacteristicRole::TRANSFER_ORDER`]. The sequence is not atomic: a
//! failed write leaves the earlier fields applied on the device. Re-sending
//! the whole record is always safe.

use std::time::Duration;

use tracing::{debug, info, warn};

use timecube_types::codec::{PROJECT_BLOCK_LEN, encode_project_ids, encode_text};
use timecube_types::{CharacteristicRole, ConfigurationRecord};

use crate::error::{Error, Result};
use crate::manager::ConnectionManager;

/// Options for a configuration transfer.
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Pause between consecutive writes. Default: none.
    pub inter_write_delay: Duration,
}

impl TransferOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pause between consecutive writes.
    #[must_use]
    pub fn inter_write_delay(mut self, delay: Duration) -> Self {
        self.inter_write_delay = delay;
        self
    }
}

/// Sends configuration records over the manager's link.
///
/// ```
/// use std::sync::Arc;
/// use timecube_core::{ConfigurationTransfer, ConnectionManager, MockTransport};
/// use timecube_types::{
///     ConfigurationRecord, ProjectAssignments, ProviderCredentials, WifiCredentials,
/// };
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> timecube_core::Result<()> {
/// let transport = Arc::new(MockTransport::new("AA:BB", "TimeTracker-01"));
/// let manager = ConnectionManager::new(transport.clone());
/// manager.connect("AA:BB").await?;
///
/// let record = ConfigurationRecord::new(
///     WifiCredentials { ssid: "home".into(), password: "secret".into() },
///     ProviderCredentials { token: "tok".into(), workspace_id: "42".into() },
///     ProjectAssignments { face_down: 10, ..Default::default() },
/// );
/// ConfigurationTransfer::new(manager).send(&record).await?;
/// assert_eq!(transport.link().writes().len(), 5);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigurationTransfer {
    manager: ConnectionManager,
    options: TransferOptions,
}

impl ConfigurationTransfer {
    /// Create a transfer with default options.
    pub fn new(manager: ConnectionManager) -> Self {
        Self::with_options(manager, TransferOptions::default())
    }

    /// Create a transfer with custom options.
    pub fn with_options(manager: ConnectionManager, options: TransferOptions) -> Self {
        Self { manager, options }
    }

    /// Get the transfer options.
    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Write every field of `record`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no link is open; nothing is written.
    /// - [`Error::TransferFailed`] naming the first field that failed.
    /// - [`Error::ConnectionLost`] if the link went away mid-transfer.
    pub async fn send(&self, record: &ConfigurationRecord) -> Result<()> {
        self.send_with_progress(record, |_| {}).await
    }

    /// Write every field of `record`, calling `on_written` after each
    /// acknowledged write.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn send_with_progress<F>(
        &self,
        record: &ConfigurationRecord,
        mut on_written: F,
    ) -> Result<()>
    where
        F: FnMut(CharacteristicRole),
    {
        let session = self.manager.session()?;
        let delay = self.options.inter_write_delay;

        for (index, role) in CharacteristicRole::TRANSFER_ORDER.into_iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                session
                    .guarded(async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
            }

            let (payload, len) = match record.text_field(role) {
                Some(value) => (encode_text(value), value.len()),
                None => (
                    encode_project_ids(&record.project_slots()),
                    PROJECT_BLOCK_LEN,
                ),
            };
            if len > role.max_len() {
                warn!(
                    field = %role,
                    bytes = len,
                    limit = role.max_len(),
                    "Field exceeds device buffer"
                );
            }
            match record.text_field(role) {
                Some(value) if !role.is_secret() => {
                    debug!(field = %role, bytes = len, value, "Writing field");
                }
                _ => debug!(field = %role, bytes = len, "Writing field"),
            }

            match session.write(role, &payload).await {
                Ok(()) => on_written(role),
                Err(Error::ConnectionLost) => return Err(Error::ConnectionLost),
                Err(e) => {
                    warn!(field = %role, error = %e, "Write failed");
                    return Err(Error::transfer_failed(role, e));
                }
            }
        }

        info!("Configuration sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::sync::Arc;
    use timecube_types::codec::{decode_project_ids, decode_text};
    use timecube_types::{ProjectAssignments, ProviderCredentials, WifiCredentials};

    fn record(ssid: &str) -> ConfigurationRecord {
        ConfigurationRecord::new(
            WifiCredentials {
                ssid: ssid.to_string(),
                password: "secret".to_string(),
            },
            ProviderCredentials {
                token: "tok123456789012".to_string(),
                workspace_id: "42".to_string(),
            },
            ProjectAssignments {
                face_down: 10,
                left_side: 20,
                right_side: 30,
                front_edge: 40,
                back_edge: 50,
            },
        )
    }

    async fn connected() -> (Arc<MockTransport>, ConnectionManager) {
        let transport = Arc::new(MockTransport::new("AA:BB", "TimeTracker-01"));
        let manager = ConnectionManager::new(transport.clone());
        manager.connect("AA:BB").await.unwrap();
        (transport, manager)
    }

    #[tokio::test]
    async fn test_send_not_connected() {
        let transport = Arc::new(MockTransport::new("AA:BB", "TimeTracker-01"));
        let manager = ConnectionManager::new(transport.clone());

        let result = ConfigurationTransfer::new(manager).send(&record("home")).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(transport.link().writes().is_empty());
        assert_eq!(transport.connect_count(), 0);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_only_non_secret_values_are_logged() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (_, manager) = connected().await;
        ConfigurationTransfer::new(manager)
            .send(&record("home-net"))
            .await
            .unwrap();

        let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("home-net"));
        assert!(logs.contains("Writing field"));
        assert!(!logs.contains("secret"));
        assert!(!logs.contains("tok123456789012"));
    }

    #[tokio::test]
    async fn test_send_writes_fields_in_order() {
        let (transport, manager) = connected().await;
        let mut progress = Vec::new();

        ConfigurationTransfer::new(manager)
            .send_with_progress(&record("home"), |role| progress.push(role))
            .await
            .unwrap();

        let writes = transport.link().writes();
        let roles: Vec<_> = writes.iter().map(|(role, _)| *role).collect();
        assert_eq!(roles, CharacteristicRole::TRANSFER_ORDER);
        assert_eq!(progress, CharacteristicRole::TRANSFER_ORDER);

        assert_eq!(decode_text(&writes[0].1).unwrap(), "home");
        assert_eq!(decode_text(&writes[1].1).unwrap(), "secret");
        assert_eq!(decode_text(&writes[2].1).unwrap(), "tok123456789012");
        assert_eq!(decode_text(&writes[3].1).unwrap(), "42");
        assert_eq!(
            decode_project_ids(&writes[4].1).unwrap(),
            [0, 10, 20, 30, 40, 50]
        );
    }

    #[tokio::test]
    async fn test_partial_failure_then_resend() {
        let (transport, manager) = connected().await;
        let link = transport.link();
        link.fail_write_at(3);
        let transfer = ConfigurationTransfer::new(manager.clone());

        let err = transfer.send(&record("home")).await.unwrap_err();
        assert_eq!(err.failed_field(), Some(CharacteristicRole::ProviderToken));
        assert_eq!(link.writes().len(), 2);
        assert!(manager.is_connected());

        transfer.send(&record("office")).await.unwrap();
        assert_eq!(link.writes().len(), 7);
        assert_eq!(
            link.written_text(CharacteristicRole::WifiSsid).as_deref(),
            Some("office")
        );
        assert_eq!(
            link.written_text(CharacteristicRole::ProviderToken).as_deref(),
            Some("tok123456789012")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_preempts_transfer() {
        let (transport, manager) = connected().await;
        let link = transport.link();
        link.set_write_latency(Duration::from_millis(100));

        let transfer = ConfigurationTransfer::new(manager.clone());
        let pending = tokio::spawn(async move { transfer.send(&record("home")).await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        link.drop_link();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(Error::ConnectionLost)));
        assert_eq!(link.writes().len(), 1);
        assert!(manager.current_state().is_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_inter_write_delay() {
        let (transport, manager) = connected().await;
        let transfer = ConfigurationTransfer::with_options(
            manager.clone(),
            TransferOptions::new().inter_write_delay(Duration::from_millis(100)),
        );
        let pending = tokio::spawn(async move { transfer.send(&record("home")).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.disconnect().await.unwrap();

        assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionLost)));
        assert_eq!(transport.link().writes().len(), 1);
    }
}
