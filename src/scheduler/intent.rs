//! Reservation Intents
//!
//! An [`Intent`] binds a client operation to a (device, medium, mount root)
//! triple from a successful prepare until `resource_release`. Releasing an
//! already-released intent is a no-op.

use crate::domain::media::{AddrType, FsType, MediumId};
use std::path::{Path, PathBuf};

/// Handle returned by the prepare operations.
#[derive(Debug)]
pub struct Intent {
    pub(crate) root_path: Option<PathBuf>,
    pub(crate) medium: MediumId,
    pub(crate) fs_type: FsType,
    pub(crate) addr_type: AddrType,
    pub(crate) size: u64,
    /// Index of the owning device descriptor in the scheduler cache
    pub(crate) device_slot: Option<usize>,
}

impl Intent {
    /// Root of the mounted filesystem to perform I/O under.
    pub fn root_path(&self) -> Option<&Path> {
        self.root_path.as_deref()
    }

    /// Medium reserved for this operation.
    pub fn medium(&self) -> &MediumId {
        &self.medium
    }

    pub fn fs_type(&self) -> FsType {
        self.fs_type
    }

    pub fn addr_type(&self) -> AddrType {
        self.addr_type
    }

    /// Size of the extent this reservation was sized for.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// True once `resource_release` has run (or never succeeded a prepare).
    pub fn is_released(&self) -> bool {
        self.device_slot.is_none()
    }
}
