//! Peripheral identity helpers, and a guard for cleanup that must survive a
//! dropped future.

use std::future::Future;

use btleplug::platform::PeripheralId;

/// Address CoreBluetooth reports for every peripheral.
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs; elsewhere they wrap the MAC address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Create an identity string from an address and peripheral ID.
///
/// On macOS, where addresses are hidden, the peripheral ID is used instead.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if address == HIDDEN_ADDRESS {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

/// Compare two identities, ignoring case and MAC separators.
///
/// ```
/// use timecube_core::util::identity_matches;
///
/// assert!(identity_matches("AA:BB:CC:DD:EE:FF", "aabbccddeeff"));
/// assert!(!identity_matches("AA:BB:CC:DD:EE:FF", "AA:BB"));
/// ```
pub fn identity_matches(candidate: &str, identity: &str) -> bool {
    if candidate.is_empty() || identity.is_empty() || candidate == HIDDEN_ADDRESS {
        return false;
    }
    normalize(candidate) == normalize(identity)
}

fn normalize(identity: &str) -> String {
    identity
        .chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// An async cleanup step that runs exactly once: awaited by
/// [`Cleanup::run`], or spawned onto the current runtime if the guard is
/// dropped first.
pub(crate) struct Cleanup<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    step: Option<F>,
}

impl<F> Cleanup<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    pub(crate) fn new(step: F) -> Self {
        Self { step: Some(step) }
    }

    /// Run the step now.
    pub(crate) async fn run(mut self) {
        if let Some(step) = self.step.take() {
            step.await;
        }
    }

    /// Skip the step.
    pub(crate) fn disarm(mut self) {
        self.step = None;
    }
}

impl<F> Drop for Cleanup<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(step) = self.step.take()
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            runtime.spawn(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_cleanup(
        runs: &Arc<AtomicUsize>,
    ) -> Cleanup<impl Future<Output = ()> + Send + 'static> {
        let runs = Arc::clone(runs);
        Cleanup::new(async move {
            runs.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_cleanup_run_awaits_step_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        counting_cleanup(&runs).run().await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cleanup_disarm_skips_step() {
        let runs = Arc::new(AtomicUsize::new(0));
        counting_cleanup(&runs).disarm();
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_runs_when_future_times_out() {
        let runs = Arc::new(AtomicUsize::new(0));
        let guard = counting_cleanup(&runs);
        let stuck = async move {
            let _guard = guard;
            futures::future::pending::<()>().await;
        };

        assert!(tokio::time::timeout(Duration::from_secs(15), stuck).await.is_err());
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identity_matches_mac_forms() {
        assert!(identity_matches("AA:BB:CC:DD:EE:FF", "aa:bb:cc:dd:ee:ff"));
        assert!(identity_matches("aa-bb-cc-dd-ee-ff", "AABBCCDDEEFF"));
    }

    #[test]
    fn test_identity_matches_macos_uuid() {
        assert!(identity_matches(
            "5F2C1A3E-0000-4B4B-9D9D-0123456789AB",
            "5f2c1a3e-0000-4b4b-9d9d-0123456789ab"
        ));
    }

    #[test]
    fn test_hidden_address_never_matches() {
        assert!(!identity_matches(HIDDEN_ADDRESS, "000000000000"));
        assert!(!identity_matches("", ""));
    }

    proptest::proptest! {
        #[test]
        fn prop_identity_matches_any_mac_spelling(
            bytes in proptest::prelude::any::<[u8; 6]>()
        ) {
            let canonical = bytes
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(":");
            let dashed = canonical.to_lowercase().replace(':', "-");
            proptest::prop_assume!(canonical != HIDDEN_ADDRESS);
            proptest::prop_assert!(identity_matches(&canonical, &dashed));
        }
    }
}
