//! Device Descriptors
//!
//! The scheduler's live view of one local drive: the metadata store row,
//! the operating-system view, the library view, and the loaded medium.
//!
//! State invariants:
//! - `Mounted` implies a mount path and a loaded medium.
//! - `Loaded` implies a loaded medium and no mount path.
//! - `Empty` implies neither.

use crate::domain::device::DeviceInfo;
use crate::domain::media::{MediumId, MediumInfo};
use crate::domain::ports::{DriveSlot, SysDeviceState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

// =============================================================================
// Operational Status
// =============================================================================

/// Operational status of a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Empty,
    Loaded,
    Mounted,
    Failed,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Empty => write!(f, "empty"),
            DeviceStatus::Loaded => write!(f, "loaded"),
            DeviceStatus::Mounted => write!(f, "mounted"),
            DeviceStatus::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Device Descriptor
// =============================================================================

/// All needed information to select and drive one local device.
#[derive(Debug)]
pub struct DeviceDescriptor {
    /// Device row from the metadata store
    pub info: DeviceInfo,
    /// Resolved device node path
    pub path: PathBuf,
    /// Identity as reported by the operating system
    pub sys: SysDeviceState,
    /// Library view: element address, full flag, contained medium id
    pub slot: DriveSlot,
    /// Operational status
    pub status: DeviceStatus,
    /// Loaded medium record, owned by this descriptor while loaded
    pub medium: Option<MediumInfo>,
    /// Mount path of the filesystem, when mounted
    pub mount_path: Option<PathBuf>,
    /// True iff this instance holds the store lock on the device row
    pub locked_local: bool,
}

impl DeviceDescriptor {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            path: PathBuf::new(),
            sys: SysDeviceState::default(),
            slot: DriveSlot::default(),
            status: DeviceStatus::Empty,
            medium: None,
            mount_path: None,
            locked_local: false,
        }
    }

    /// False if the device is locked by us or contains a medium locked by
    /// another instance, true otherwise.
    pub fn is_available(&self) -> bool {
        if self.locked_local {
            debug!("'{}' is locked", self.path.display());
            return false;
        }

        if let Some(medium) = &self.medium {
            if medium.lock.is_external() {
                debug!("'{}' contains a locked medium", self.path.display());
                return false;
            }
        }
        true
    }

    /// Free space on the loaded medium, if any.
    pub fn medium_free(&self) -> Option<u64> {
        self.medium.as_ref().map(|m| m.stats.phys_spc_free)
    }

    /// True when the library reports this drive holding `id`.
    pub fn holds(&self, id: &MediumId) -> bool {
        self.slot.medium.as_ref() == Some(id)
    }

    /// Check the state invariants of this descriptor.
    pub fn state_is_consistent(&self) -> bool {
        match self.status {
            DeviceStatus::Mounted => self.mount_path.is_some() && self.medium.is_some(),
            DeviceStatus::Loaded => self.medium.is_some() && self.mount_path.is_none(),
            DeviceStatus::Empty => self.medium.is_none() && self.mount_path.is_none(),
            DeviceStatus::Failed => true,
        }
    }
}
