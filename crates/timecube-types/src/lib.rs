//! Platform-agnostic types for TimeCube time-tracking devices.
//!
//! This crate provides the data model and wire codec shared by the BLE core
//! (timecube-core) and any other front end that needs to build or inspect
//! configuration payloads.
//!
//! # Features
//!
//! - Configuration record, device status and connection state types
//! - UUID constants for the configuration service
//! - Base64 text codec and the fixed 24-byte project block codec
//!
//! # Example
//!
//! ```
//! use timecube_types::codec::{decode_project_ids, encode_project_ids};
//! use timecube_types::ProjectAssignments;
//!
//! let assignments = ProjectAssignments {
//!     face_down: 10,
//!     left_side: 20,
//!     right_side: 30,
//!     front_edge: 40,
//!     back_edge: 50,
//! };
//! let wire = encode_project_ids(&assignments.to_slots());
//! assert_eq!(decode_project_ids(&wire).unwrap(), [0, 10, 20, 30, 40, 50]);
//! ```

pub mod codec;
pub mod error;
pub mod types;
pub mod uuid;

pub use error::{DecodeError, DecodeResult};
pub use types::{
    CharacteristicRole, ConfigurationRecord, ConnectionState, DeviceDescriptor, DeviceStatus,
    Orientation, PROJECT_SLOT_COUNT, ProjectAssignments, ProviderCredentials, WifiCredentials,
};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_project_ids, decode_text, encode_project_ids, encode_text};

    fn sample_record() -> ConfigurationRecord {
        ConfigurationRecord::new(
            WifiCredentials {
                ssid: "home".to_string(),
                password: "secret".to_string(),
            },
            ProviderCredentials {
                token: "tok123456789012".to_string(),
                workspace_id: "42".to_string(),
            },
            ProjectAssignments::from_slots([0, 10, 20, 30, 40, 50]),
        )
    }

    #[test]
    fn test_record_encodes_every_transfer_field() {
        let record = sample_record();
        for role in CharacteristicRole::TRANSFER_ORDER {
            match record.text_field(role) {
                Some(text) => assert_eq!(decode_text(&encode_text(text)).unwrap(), text),
                None => {
                    assert_eq!(role, CharacteristicRole::ProjectIds);
                    let wire = encode_project_ids(&record.project_slots());
                    assert_eq!(decode_project_ids(&wire).unwrap(), [0, 10, 20, 30, 40, 50]);
                }
            }
        }
    }

    #[test]
    fn test_project_block_fits_firmware_buffer() {
        assert_eq!(
            codec::PROJECT_BLOCK_LEN,
            CharacteristicRole::ProjectIds.max_len()
        );
    }
}
