//! Error types for timecube-core.
//!
//! Every operation in this crate resolves to a typed [`Result`]. None of these
//! errors is fatal to the process, and after any of them the
//! [`ConnectionManager`](crate::ConnectionManager) is either `Disconnected` or
//! `Connected`, never in between.
//!
//! # Recovery
//!
//! The core never retries on its own. Callers decide, and
//! [`Error::is_retryable`] gives a starting point:
//!
//! | Error Type | Strategy |
//! |------------|----------|
//! | [`Error::PermissionDenied`], [`Error::RadioDisabled`] | Ask the user to fix it, then rescan |
//! | [`Error::AlreadyConnectingOrConnected`] | Do not retry; disconnect first |
//! | [`Error::ConnectFailed`] | Retry the connect |
//! | [`Error::TransferFailed`] | Re-send the whole record (always safe) |
//! | [`Error::ConnectionLost`] | Reconnect, then re-send |
//! | [`Error::Timeout`] | Re-send the record or keep waiting |
//! | [`Error::Decode`] | Do not retry; firmware mismatch |

use std::time::Duration;

use thiserror::Error;

use timecube_types::{CharacteristicRole, DecodeError};

/// Errors that can occur while discovering, connecting to or provisioning a
/// TimeCube.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth permission has not been granted to this process.
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    /// The radio is powered off.
    #[error("Bluetooth radio is disabled")]
    RadioDisabled,

    /// No Bluetooth adapter is present.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// A connect was requested while a link exists or is being opened.
    #[error("Already connecting or connected")]
    AlreadyConnectingOrConnected,

    /// The operation requires an open link.
    #[error("Not connected to device")]
    NotConnected,

    /// Opening the link failed.
    #[error("Failed to connect to {identity}: {reason}")]
    ConnectFailed {
        /// Identity the connect was attempted with.
        identity: String,
        /// Underlying failure.
        #[source]
        reason: Box<Error>,
    },

    /// Tearing down the link failed. State is `Disconnected` regardless.
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    /// Writing one field of a configuration record failed.
    ///
    /// Fields before `field` have already been applied on the device.
    #[error("Failed to write {field}: {reason}")]
    TransferFailed {
        /// The field whose write failed.
        field: CharacteristicRole,
        /// Underlying failure.
        #[source]
        reason: Box<Error>,
    },

    /// A payload from the device could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The link went away while the operation was in flight.
    #[error("Connection lost")]
    ConnectionLost,

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// A configuration characteristic is missing on the connected device.
    #[error("Characteristic not found: {role} ({uuid})")]
    CharacteristicNotFound {
        /// Role that was looked up.
        role: CharacteristicRole,
        /// Its UUID.
        uuid: String,
    },

    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The manager was shut down and no longer accepts connections.
    #[error("Connection manager has been shut down")]
    ShutDown,

    /// Failure reported by a transport implementation.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Wrap a failure as a connect error for `identity`.
    pub fn connect_failed(identity: impl Into<String>, reason: Error) -> Self {
        Self::ConnectFailed {
            identity: identity.into(),
            reason: Box::new(reason),
        }
    }

    /// Wrap a failure as a transfer error naming `field`.
    pub fn transfer_failed(field: CharacteristicRole, reason: Error) -> Self {
        Self::TransferFailed {
            field,
            reason: Box::new(reason),
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(role: CharacteristicRole) -> Self {
        Self::CharacteristicNotFound {
            role,
            uuid: role.uuid().to_string(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Whether repeating the operation (or the whole transfer) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ConnectFailed { .. }
            | Error::TransferFailed { .. }
            | Error::ConnectionLost
            | Error::Timeout { .. }
            | Error::Bluetooth(_)
            | Error::Transport(_) => true,
            Error::PermissionDenied
            | Error::RadioDisabled
            | Error::NoAdapter
            | Error::AlreadyConnectingOrConnected
            | Error::NotConnected
            | Error::DisconnectFailed(_)
            | Error::Decode(_)
            | Error::CharacteristicNotFound { .. }
            | Error::ShutDown => false,
        }
    }

    /// The field a [`Error::TransferFailed`] names, if any.
    pub fn failed_field(&self) -> Option<CharacteristicRole> {
        match self {
            Error::TransferFailed { field, .. } => Some(*field),
            _ => None,
        }
    }
}

/// Result type alias using timecube-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::timeout("await status config_success", Duration::from_millis(200));
        assert!(err.to_string().contains("config_success"));
        assert!(err.to_string().contains("200ms"));

        let err = Error::transfer_failed(
            CharacteristicRole::ProviderToken,
            Error::transport("write rejected"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to write provider token: Transport error: write rejected"
        );

        let err = Error::characteristic_not_found(CharacteristicRole::Status);
        assert!(err.to_string().contains("6ba7b816"));
    }

    #[test]
    fn test_connect_failed_keeps_source() {
        use std::error::Error as _;

        let err = Error::connect_failed("AA:BB", Error::timeout("connect", Duration::from_secs(1)));
        assert!(err.to_string().contains("AA:BB"));
        let source = err.source().map(|s| s.to_string()).unwrap_or_default();
        assert!(source.contains("connect"));
    }

    #[test]
    fn test_retry_classification() {
        assert!(Error::ConnectionLost.is_retryable());
        assert!(Error::timeout("x", Duration::from_secs(1)).is_retryable());
        assert!(!Error::AlreadyConnectingOrConnected.is_retryable());
        assert!(!Error::PermissionDenied.is_retryable());
        assert!(
            !Error::Decode(DecodeError::InvalidLength {
                expected: 24,
                actual: 3
            })
            .is_retryable()
        );
    }

    #[test]
    fn test_failed_field() {
        let err = Error::transfer_failed(CharacteristicRole::WorkspaceId, Error::ConnectionLost);
        assert_eq!(err.failed_field(), Some(CharacteristicRole::WorkspaceId));
        assert_eq!(Error::NotConnected.failed_field(), None);
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
