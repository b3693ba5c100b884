use serde::{Deserialize, Serialize};
use std::fmt;

pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionMode {
    Bridge,
    Bootloader,
    Sideload,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionMode::Bridge => "ADB",
            ConnectionMode::Bootloader => "FASTBOOT",
            ConnectionMode::Sideload => "SIDELOAD",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceRecord {
    pub mode: ConnectionMode,
    pub serial: String,
}

impl DeviceRecord {
    pub fn new(mode: ConnectionMode, serial: impl Into<String>) -> Self {
        Self {
            mode,
            serial: serial.into(),
        }
    }

    pub fn selection(&self) -> DeviceSelection {
        DeviceSelection {
            serial: self.serial.clone(),
            mode: self.mode,
        }
    }
}

/// The device a caller is acting on. Passed into every core call; the core keeps no
/// "current device" of its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceSelection {
    pub serial: String,
    pub mode: ConnectionMode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RootState {
    Yes,
    No,
    #[serde(rename = "N/A")]
    NotAvailable,
}

impl fmt::Display for RootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RootState::Yes => "Yes",
            RootState::No => "No",
            RootState::NotAvailable => NOT_AVAILABLE,
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnlockState {
    Unlocked,
    Locked,
    Unknown,
    #[serde(rename = "N/A")]
    NotAvailable,
}

impl fmt::Display for UnlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UnlockState::Unlocked => "Unlocked",
            UnlockState::Locked => "Locked",
            UnlockState::Unknown => "Unknown",
            UnlockState::NotAvailable => NOT_AVAILABLE,
        };
        f.write_str(label)
    }
}

/// Mode-dependent identity of one device. Fields that do not apply to `mode` always hold
/// their not-available value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub mode: ConnectionMode,
    pub model: String,
    pub build: String,
    pub root: RootState,
    pub product: String,
    pub unlocked: UnlockState,
}

impl DeviceInfo {
    pub fn placeholder(serial: &str, mode: ConnectionMode) -> Self {
        let (root, unlocked) = match mode {
            ConnectionMode::Bridge => (RootState::No, UnlockState::NotAvailable),
            ConnectionMode::Bootloader => (RootState::NotAvailable, UnlockState::Unknown),
            ConnectionMode::Sideload => (RootState::NotAvailable, UnlockState::NotAvailable),
        };
        Self {
            serial: serial.to_string(),
            mode,
            model: NOT_AVAILABLE.to_string(),
            build: NOT_AVAILABLE.to_string(),
            root,
            product: NOT_AVAILABLE.to_string(),
            unlocked,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveMetrics {
    pub battery: String,
    pub temperature: String,
    pub storage: String,
}

impl Default for LiveMetrics {
    fn default() -> Self {
        Self {
            battery: NOT_AVAILABLE.to_string(),
            temperature: NOT_AVAILABLE.to_string(),
            storage: NOT_AVAILABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PartitionCatalog {
    pub standard: Vec<String>,
    pub critical: Vec<String>,
}

impl PartitionCatalog {
    pub fn is_empty(&self) -> bool {
        self.standard.is_empty() && self.critical.is_empty()
    }

    pub fn len(&self) -> usize {
        self.standard.len() + self.critical.len()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FlashStatus {
    Pending,
    Flashing,
    Success,
    Failed,
}

impl FlashStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlashStatus::Success | FlashStatus::Failed)
    }

    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            FlashStatus::Success
        } else {
            FlashStatus::Failed
        }
    }
}

impl fmt::Display for FlashStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FlashStatus::Pending => "Pending",
            FlashStatus::Flashing => "Flashing",
            FlashStatus::Success => "Success",
            FlashStatus::Failed => "Failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlashQueueEntry {
    pub partition: String,
    pub image_path: String,
    pub status: FlashStatus,
}

impl FlashQueueEntry {
    pub fn new(partition: impl Into<String>, image_path: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            image_path: image_path.into(),
            status: FlashStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    pub version_output: String,
    pub command_path: String,
    pub error: Option<String>,
}
