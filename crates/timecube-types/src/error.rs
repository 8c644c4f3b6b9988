//! Error types for wire decoding in timecube-types.

use thiserror::Error;

/// Errors that can occur when decoding a characteristic payload.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in timecube-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The payload is not valid binary-to-text (base64) input.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// The decoded bytes are not valid UTF-8.
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    /// The decoded payload has the wrong length.
    #[error("Invalid payload length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Length required by the protocol.
        expected: usize,
        /// Length actually decoded.
        actual: usize,
    },
}

/// Result type alias using timecube-types' DecodeError type.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::InvalidLength {
            expected: 24,
            actual: 20,
        };
        assert_eq!(
            err.to_string(),
            "Invalid payload length: expected 24 bytes, got 20"
        );

        let err = DecodeError::Malformed("bad symbol".to_string());
        assert!(err.to_string().contains("bad symbol"));
    }
}
