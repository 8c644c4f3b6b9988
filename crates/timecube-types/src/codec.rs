//! Characteristic wire codec.
//!
//! Every configuration characteristic carries a base64 payload: text
//! fields are UTF-8 strings, and the project block is a fixed 24-byte
//! little-endian array of six `i32` values. The firmware has no framing or
//! length prefix, so the width and byte order of the block are part of the
//! protocol.
//!
//! No length limits are enforced here; see
//! [`CharacteristicRole::max_len`](crate::CharacteristicRole::max_len).

use bytes::{Buf, BufMut};
use data_encoding::BASE64;

use crate::error::{DecodeError, DecodeResult};
use crate::types::PROJECT_SLOT_COUNT;

/// Size of the project block before text encoding.
pub const PROJECT_BLOCK_LEN: usize = PROJECT_SLOT_COUNT * 4;

/// Encode a UTF-8 string for the wire.
///
/// ```
/// use timecube_types::codec::{decode_text, encode_text};
///
/// assert_eq!(encode_text("home"), "aG9tZQ==");
/// assert_eq!(decode_text("aG9tZQ==").unwrap(), "home");
/// assert_eq!(encode_text(""), "");
/// ```
#[must_use]
pub fn encode_text(value: &str) -> String {
    BASE64.encode(value.as_bytes())
}

/// Decode a wire payload back into a string.
///
/// An empty payload yields an empty string.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if the payload is not valid base64, or
/// [`DecodeError::InvalidUtf8`] if the decoded bytes are not UTF-8.
pub fn decode_text(wire: &str) -> DecodeResult<String> {
    let bytes = decode_bytes(wire)?;
    String::from_utf8(bytes).map_err(|e| DecodeError::InvalidUtf8(e.to_string()))
}

/// Encode the six project slots as a 24-byte little-endian block, then base64.
///
/// Slot values are written as given; forcing slot 0 to zero is the job of
/// [`ProjectAssignments::to_slots`](crate::ProjectAssignments::to_slots).
#[must_use]
pub fn encode_project_ids(ids: &[i32; PROJECT_SLOT_COUNT]) -> String {
    BASE64.encode(&project_block(ids))
}

/// The raw 24-byte block for a set of project slots.
#[must_use]
pub fn project_block(ids: &[i32; PROJECT_SLOT_COUNT]) -> [u8; PROJECT_BLOCK_LEN] {
    let mut block = [0u8; PROJECT_BLOCK_LEN];
    let mut buf = &mut block[..];
    for id in ids {
        buf.put_i32_le(*id);
    }
    block
}

/// Decode a project block payload.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] for invalid base64 and
/// [`DecodeError::InvalidLength`] unless exactly 24 bytes are decoded.
pub fn decode_project_ids(wire: &str) -> DecodeResult<[i32; PROJECT_SLOT_COUNT]> {
    let bytes = decode_bytes(wire)?;
    if bytes.len() != PROJECT_BLOCK_LEN {
        return Err(DecodeError::InvalidLength {
            expected: PROJECT_BLOCK_LEN,
            actual: bytes.len(),
        });
    }

    let mut buf = bytes.as_slice();
    let mut ids = [0i32; PROJECT_SLOT_COUNT];
    for id in ids.iter_mut() {
        *id = buf.get_i32_le();
    }
    Ok(ids)
}

/// Base64-decode a payload into raw bytes.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if the payload is not valid base64.
pub fn decode_bytes(wire: &str) -> DecodeResult<Vec<u8>> {
    BASE64
        .decode(wire.trim().as_bytes())
        .map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Base64-encode raw bytes.
#[must_use]
pub fn encode_bytes(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}
