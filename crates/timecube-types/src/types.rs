//! Core types for TimeCube provisioning.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::uuid::{
    DEVICE_NAME_PREFIX, PROJECT_IDS, PROVIDER_TOKEN, STATUS, WIFI_PASSWORD, WIFI_SSID,
    WORKSPACE_ID,
};

/// Number of project-assignment slots in the wire block.
pub const PROJECT_SLOT_COUNT: usize = 6;

/// A device seen in an advertisement.
///
/// Snapshot of one advertisement; it is never updated after creation.
/// `identity` is the stable key for de-duplication and for connecting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceDescriptor {
    /// Stable identifier (MAC address on Linux/Windows, UUID on macOS).
    pub identity: String,
    /// Advertised local name, e.g. `TimeTracker-1A2B`.
    pub display_name: String,
    /// Signal strength in dBm, if reported.
    pub signal_strength: Option<i16>,
    /// Whether the advertisement was connectable.
    pub connectable: bool,
}

impl DeviceDescriptor {
    /// Check whether an advertised name follows the TimeCube naming convention.
    #[must_use]
    pub fn matches_name(name: &str) -> bool {
        name.starts_with(DEVICE_NAME_PREFIX)
    }

    /// The hex suffix of the display name (last four MAC digits), if present.
    #[must_use]
    pub fn suffix(&self) -> Option<&str> {
        device_suffix(&self.display_name)
    }
}

/// Extract the MAC-derived suffix from a `TimeTracker-XXXX` name.
///
/// ```
/// use timecube_types::types::device_suffix;
///
/// assert_eq!(device_suffix("TimeTracker-1A2B"), Some("1A2B"));
/// assert_eq!(device_suffix("TimeTracker-"), None);
/// assert_eq!(device_suffix("Other-1A2B"), None);
/// ```
#[must_use]
pub fn device_suffix(name: &str) -> Option<&str> {
    name.strip_prefix(DEVICE_NAME_PREFIX)
        .filter(|suffix| !suffix.is_empty())
}

/// The single connection state owned by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "state", rename_all = "snake_case"))]
pub enum ConnectionState {
    /// No link exists.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// A link is open to exactly one device.
    Connected {
        /// Identity the link was opened with.
        identity: String,
        /// Name of the connected device.
        display_name: String,
    },
}

impl ConnectionState {
    /// True only for [`ConnectionState::Connected`].
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// True for [`ConnectionState::Disconnected`].
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected { display_name, .. } => {
                write!(f, "connected to {}", display_name)
            }
        }
    }
}

/// Role of a characteristic in the configuration service.
///
/// Each role maps to exactly one fixed characteristic UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CharacteristicRole {
    /// WiFi network name.
    WifiSsid,
    /// WiFi passphrase.
    WifiPassword,
    /// Time-tracking provider API token.
    ProviderToken,
    /// Provider workspace identifier.
    WorkspaceId,
    /// 24-byte project assignment block.
    ProjectIds,
    /// Status notifications from the device.
    Status,
}

impl CharacteristicRole {
    /// Order in which a configuration record is written to the device.
    ///
    /// The firmware advances its parsing state per field, so this order is fixed.
    pub const TRANSFER_ORDER: [CharacteristicRole; 5] = [
        CharacteristicRole::WifiSsid,
        CharacteristicRole::WifiPassword,
        CharacteristicRole::ProviderToken,
        CharacteristicRole::WorkspaceId,
        CharacteristicRole::ProjectIds,
    ];

    /// The characteristic UUID for this role.
    #[must_use]
    pub fn uuid(&self) -> uuid::Uuid {
        match self {
            CharacteristicRole::WifiSsid => WIFI_SSID,
            CharacteristicRole::WifiPassword => WIFI_PASSWORD,
            CharacteristicRole::ProviderToken => PROVIDER_TOKEN,
            CharacteristicRole::WorkspaceId => WORKSPACE_ID,
            CharacteristicRole::ProjectIds => PROJECT_IDS,
            CharacteristicRole::Status => STATUS,
        }
    }

    /// Size of the firmware's buffer for this characteristic, in raw bytes.
    ///
    /// The firmware rejects text values whose length is not strictly below
    /// this size, and the project block must be exactly this size.
    #[must_use]
    pub fn max_len(&self) -> usize {
        match self {
            CharacteristicRole::WifiSsid => 64,
            CharacteristicRole::WifiPassword => 64,
            CharacteristicRole::ProviderToken => 128,
            CharacteristicRole::WorkspaceId => 16,
            CharacteristicRole::ProjectIds => 24,
            CharacteristicRole::Status => 32,
        }
    }

    /// Whether values of this role are secrets that must not be logged.
    #[must_use]
    pub fn is_secret(&self) -> bool {
        matches!(
            self,
            CharacteristicRole::WifiPassword | CharacteristicRole::ProviderToken
        )
    }

    /// Human-readable field name.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            CharacteristicRole::WifiSsid => "WiFi SSID",
            CharacteristicRole::WifiPassword => "WiFi password",
            CharacteristicRole::ProviderToken => "provider token",
            CharacteristicRole::WorkspaceId => "workspace ID",
            CharacteristicRole::ProjectIds => "project IDs",
            CharacteristicRole::Status => "status",
        }
    }

    /// Look up the role for a characteristic UUID.
    #[must_use]
    pub fn from_uuid(uuid: uuid::Uuid) -> Option<Self> {
        [
            CharacteristicRole::WifiSsid,
            CharacteristicRole::WifiPassword,
            CharacteristicRole::ProviderToken,
            CharacteristicRole::WorkspaceId,
            CharacteristicRole::ProjectIds,
            CharacteristicRole::Status,
        ]
        .into_iter()
        .find(|role| role.uuid() == uuid)
    }
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// WiFi network credentials.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WifiCredentials {
    /// Network name.
    pub ssid: String,
    /// Passphrase.
    pub password: String,
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Time-tracking provider credentials.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProviderCredentials {
    /// API token.
    pub token: String,
    /// Workspace ID (numeric, carried as text on the wire).
    pub workspace_id: String,
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("token", &"<redacted>")
            .field("workspace_id", &self.workspace_id)
            .finish()
    }
}

/// Physical resting position of the cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u8)]
pub enum Orientation {
    /// Neutral position; always means "break" and is never assigned.
    FaceUp = 0,
    /// Slot 1.
    FaceDown = 1,
    /// Slot 2.
    LeftSide = 2,
    /// Slot 3.
    RightSide = 3,
    /// Slot 4.
    FrontEdge = 4,
    /// Slot 5.
    BackEdge = 5,
}

impl Orientation {
    /// The five orientations that can carry a project, in slot order.
    pub const ASSIGNABLE: [Orientation; 5] = [
        Orientation::FaceDown,
        Orientation::LeftSide,
        Orientation::RightSide,
        Orientation::FrontEdge,
        Orientation::BackEdge,
    ];

    /// Position of this orientation in the 6-slot wire block.
    #[must_use]
    pub fn slot(&self) -> usize {
        *self as usize
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Orientation::FaceUp => "Face Up",
            Orientation::FaceDown => "Face Down",
            Orientation::LeftSide => "Left Side",
            Orientation::RightSide => "Right Side",
            Orientation::FrontEdge => "Front Edge",
            Orientation::BackEdge => "Back Edge",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Project IDs assigned to the five assignable orientations.
///
/// Face-up is always the break position and is encoded as `0` whatever the
/// caller supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProjectAssignments {
    /// Project for [`Orientation::FaceDown`].
    pub face_down: i32,
    /// Project for [`Orientation::LeftSide`].
    pub left_side: i32,
    /// Project for [`Orientation::RightSide`].
    pub right_side: i32,
    /// Project for [`Orientation::FrontEdge`].
    pub front_edge: i32,
    /// Project for [`Orientation::BackEdge`].
    pub back_edge: i32,
}

impl ProjectAssignments {
    /// Project assigned to an orientation (`0` for face-up).
    #[must_use]
    pub fn get(&self, orientation: Orientation) -> i32 {
        match orientation {
            Orientation::FaceUp => 0,
            Orientation::FaceDown => self.face_down,
            Orientation::LeftSide => self.left_side,
            Orientation::RightSide => self.right_side,
            Orientation::FrontEdge => self.front_edge,
            Orientation::BackEdge => self.back_edge,
        }
    }

    /// Assign a project to an orientation. Assigning face-up is ignored.
    pub fn set(&mut self, orientation: Orientation, project_id: i32) {
        match orientation {
            Orientation::FaceUp => {}
            Orientation::FaceDown => self.face_down = project_id,
            Orientation::LeftSide => self.left_side = project_id,
            Orientation::RightSide => self.right_side = project_id,
            Orientation::FrontEdge => self.front_edge = project_id,
            Orientation::BackEdge => self.back_edge = project_id,
        }
    }

    /// The 6-slot wire array with slot 0 fixed at `0`.
    #[must_use]
    pub fn to_slots(&self) -> [i32; PROJECT_SLOT_COUNT] {
        [
            0,
            self.face_down,
            self.left_side,
            self.right_side,
            self.front_edge,
            self.back_edge,
        ]
    }

    /// Build assignments from a decoded slot array. Slot 0 is discarded.
    #[must_use]
    pub fn from_slots(slots: [i32; PROJECT_SLOT_COUNT]) -> Self {
        Self {
            face_down: slots[1],
            left_side: slots[2],
            right_side: slots[3],
            front_edge: slots[4],
            back_edge: slots[5],
        }
    }

    /// True if at least one orientation carries a positive project ID.
    #[must_use]
    pub fn has_any(&self) -> bool {
        Orientation::ASSIGNABLE.iter().any(|o| self.get(*o) > 0)
    }
}

/// A complete configuration to be transferred to a device.
///
/// Built by the caller from validated input; the core only encodes it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConfigurationRecord {
    /// WiFi credentials.
    pub wifi: WifiCredentials,
    /// Provider credentials.
    pub provider: ProviderCredentials,
    /// Orientation to project mapping.
    pub project_assignments: ProjectAssignments,
}

impl ConfigurationRecord {
    /// Create a record from its parts.
    pub fn new(
        wifi: WifiCredentials,
        provider: ProviderCredentials,
        project_assignments: ProjectAssignments,
    ) -> Self {
        Self {
            wifi,
            provider,
            project_assignments,
        }
    }

    /// The 6-slot project block as written on the wire.
    #[must_use]
    pub fn project_slots(&self) -> [i32; PROJECT_SLOT_COUNT] {
        self.project_assignments.to_slots()
    }

    /// Text value for a text-carrying role, `None` for the project block and status.
    #[must_use]
    pub fn text_field(&self, role: CharacteristicRole) -> Option<&str> {
        match role {
            CharacteristicRole::WifiSsid => Some(&self.wifi.ssid),
            CharacteristicRole::WifiPassword => Some(&self.wifi.password),
            CharacteristicRole::ProviderToken => Some(&self.provider.token),
            CharacteristicRole::WorkspaceId => Some(&self.provider.workspace_id),
            CharacteristicRole::ProjectIds | CharacteristicRole::Status => None,
        }
    }
}

/// Lifecycle markers reported by the device on the status characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DeviceStatus {
    /// Initial value of the status characteristic after boot.
    Ready,
    /// Advertising and waiting for configuration.
    SetupMode,
    /// SSID written.
    SsidReceived,
    /// Password written.
    PasswordReceived,
    /// Provider token written.
    TokenReceived,
    /// Workspace ID written.
    WorkspaceReceived,
    /// Project block written.
    ProjectsReceived,
    /// All fields received.
    ConfigComplete,
    /// Configuration applied and the device is online.
    ConfigSuccess,
    /// The device reported an error.
    Error,
    /// A marker this version does not know.
    Other(String),
}

impl DeviceStatus {
    /// Parse a wire marker.
    ///
    /// Trailing NUL padding and surrounding whitespace are ignored, and
    /// unknown markers are preserved as [`DeviceStatus::Other`].
    ///
    /// ```
    /// use timecube_types::DeviceStatus;
    ///
    /// assert_eq!(DeviceStatus::from_marker("config_success"), DeviceStatus::ConfigSuccess);
    /// assert_eq!(DeviceStatus::from_marker("ready\0\0"), DeviceStatus::Ready);
    /// assert_eq!(
    ///     DeviceStatus::from_marker("rebooting"),
    ///     DeviceStatus::Other("rebooting".to_string())
    /// );
    /// ```
    #[must_use]
    pub fn from_marker(marker: &str) -> Self {
        let marker = marker.trim_end_matches('\0').trim();
        match marker {
            "ready" => DeviceStatus::Ready,
            "setup_mode" => DeviceStatus::SetupMode,
            "ssid_received" => DeviceStatus::SsidReceived,
            "password_received" => DeviceStatus::PasswordReceived,
            "token_received" => DeviceStatus::TokenReceived,
            "workspace_received" => DeviceStatus::WorkspaceReceived,
            "projects_received" => DeviceStatus::ProjectsReceived,
            "config_complete" => DeviceStatus::ConfigComplete,
            "config_success" => DeviceStatus::ConfigSuccess,
            "error" => DeviceStatus::Error,
            other => DeviceStatus::Other(other.to_string()),
        }
    }

    /// The wire marker for this status.
    #[must_use]
    pub fn as_marker(&self) -> &str {
        match self {
            DeviceStatus::Ready => "ready",
            DeviceStatus::SetupMode => "setup_mode",
            DeviceStatus::SsidReceived => "ssid_received",
            DeviceStatus::PasswordReceived => "password_received",
            DeviceStatus::TokenReceived => "token_received",
            DeviceStatus::WorkspaceReceived => "workspace_received",
            DeviceStatus::ProjectsReceived => "projects_received",
            DeviceStatus::ConfigComplete => "config_complete",
            DeviceStatus::ConfigSuccess => "config_success",
            DeviceStatus::Error => "error",
            DeviceStatus::Other(marker) => marker,
        }
    }

    /// Whether this status ends a provisioning attempt.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeviceStatus::ConfigSuccess | DeviceStatus::Error)
    }
}

impl FromStr for DeviceStatus {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(DeviceStatus::from_marker(s))
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_marker())
    }
}
