//! Device Rows
//!
//! Persistent description of a drive as registered in the metadata store.
//! The scheduler's live view of a drive (resolved path, library slot, loaded
//! medium) lives in [`crate::scheduler::DeviceDescriptor`].

use serde::{Deserialize, Serialize};

// =============================================================================
// Device Family
// =============================================================================

/// Kind of storage a device (and its media) belongs to.
///
/// The family selects which adapters drive the hardware: tape drives go
/// through a robotic library, directories are plain filesystem trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FamilyKind {
    Tape,
    Dir,
}

impl std::fmt::Display for FamilyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FamilyKind::Tape => write!(f, "tape"),
            FamilyKind::Dir => write!(f, "dir"),
        }
    }
}

impl std::str::FromStr for FamilyKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tape" => Ok(FamilyKind::Tape),
            "dir" => Ok(FamilyKind::Dir),
            other => Err(crate::error::Error::InvalidArgument(format!(
                "unknown family '{other}'"
            ))),
        }
    }
}

// =============================================================================
// Administrative Status
// =============================================================================

/// Administrative status of a device or medium row.
///
/// Locked rows are invisible to scheduling; only an administrator moves a
/// row between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminStatus {
    Unlocked,
    Locked,
}

impl std::fmt::Display for AdminStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminStatus::Unlocked => write!(f, "unlocked"),
            AdminStatus::Locked => write!(f, "locked"),
        }
    }
}

// =============================================================================
// Device Row
// =============================================================================

/// A device as registered in the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Storage family this drive serves
    pub family: FamilyKind,
    /// Serial number, the stable identity of the drive
    pub serial: String,
    /// Vendor model string, if registered
    #[serde(default)]
    pub model: Option<String>,
    /// Host the drive is attached to
    pub host: String,
    /// Administrative status
    pub adm_status: AdminStatus,
}
