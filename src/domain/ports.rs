//! Domain Ports - Core trait definitions for the scheduler
//!
//! These traits define the boundaries between the scheduling logic and the
//! external systems it drives: the shared metadata store, the per-family
//! device and library adapters, and the filesystem/IO adapters. Adapters
//! implement these traits to provide concrete functionality.

use crate::domain::device::{DeviceInfo, FamilyKind};
use crate::domain::media::{FsType, MediumId, MediumInfo};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// Metadata Store Port
// =============================================================================

/// A record binding an object to the medium holding its extents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub oid: String,
    pub uuid: String,
    pub version: u32,
    pub medium: MediumId,
}

/// Port to the shared metadata store.
///
/// The store is authoritative: every row mutation requires the caller to
/// hold the row lock under the given owner string. Filters are JSON
/// expressions built by [`crate::domain::filter`].
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch device rows matching a filter
    async fn device_get(&self, filter: &Value) -> Result<Vec<DeviceInfo>>;

    /// Fetch medium rows matching a filter
    async fn media_get(&self, filter: &Value) -> Result<Vec<MediumInfo>>;

    /// Fetch object rows matching a filter
    async fn object_get(&self, filter: &Value) -> Result<Vec<ObjectRecord>>;

    /// Atomically lock a device row for `owner`; fails if already held
    async fn device_lock(&self, device: &DeviceInfo, owner: &str) -> Result<()>;

    /// Release a device row lock held by `owner`
    async fn device_unlock(&self, device: &DeviceInfo, owner: &str) -> Result<()>;

    /// Atomically lock a medium row for `owner`; fails if already held
    async fn media_lock(&self, medium: &MediumId, owner: &str) -> Result<()>;

    /// Release a medium row lock held by `owner`
    async fn media_unlock(&self, medium: &MediumId, owner: &str) -> Result<()>;

    /// Update a medium row in place (stats, fs descriptor, admin status)
    async fn media_update(&self, medium: &MediumInfo) -> Result<()>;
}

// =============================================================================
// Device Adapter Port
// =============================================================================

/// Device state as reported by the operating system.
#[derive(Debug, Clone, Default)]
pub struct SysDeviceState {
    pub model: Option<String>,
    pub serial: Option<String>,
}

/// Port to per-family device control (path resolution, identity query).
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Resolve the device node path for a serial number
    async fn lookup(&self, serial: &str) -> Result<PathBuf>;

    /// Query identity and state of the device at `path`
    async fn query(&self, path: &Path) -> Result<SysDeviceState>;
}

// =============================================================================
// Library Adapter Port
// =============================================================================

/// Kind of element inside a media library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibElement {
    Unknown,
    Drive,
    Slot,
    Arm,
    ImportExport,
}

/// Address of one element inside the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibAddress {
    pub kind: LibElement,
    pub index: u64,
}

impl LibAddress {
    pub const UNKNOWN: LibAddress = LibAddress {
        kind: LibElement::Unknown,
        index: 0,
    };

    pub fn new(kind: LibElement, index: u64) -> Self {
        Self { kind, index }
    }
}

/// A drive as seen by the library: its element address, whether it holds a
/// medium, and which one.
#[derive(Debug, Clone)]
pub struct DriveSlot {
    pub address: LibAddress,
    pub full: bool,
    pub medium: Option<MediumId>,
}

impl Default for DriveSlot {
    fn default() -> Self {
        Self {
            address: LibAddress::UNKNOWN,
            full: false,
            medium: None,
        }
    }
}

/// Port to the robotic media library of one family.
///
/// Implementations open and close their control handle per operation;
/// no long-lived shared state is held across calls. Non-tape families are
/// served by a no-op implementation that reports every drive as full with
/// the medium derived from the drive identity.
#[async_trait]
pub trait LibraryAdapter: Send + Sync {
    /// Where is the drive with this serial, and what does it hold?
    async fn drive_lookup(&self, serial: &str) -> Result<DriveSlot>;

    /// Where is the medium with this label?
    async fn media_lookup(&self, label: &str) -> Result<LibAddress>;

    /// Move a medium between two element addresses. A destination of
    /// [`LibAddress::UNKNOWN`] lets the library choose any free slot.
    async fn media_move(&self, src: &LibAddress, dst: &LibAddress) -> Result<()>;
}

// =============================================================================
// Filesystem Adapter Port
// =============================================================================

/// Space usage reported by a filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSpace {
    pub used: u64,
    pub avail: u64,
    /// The mount is read-only; writes would fail
    pub readonly: bool,
}

/// Port to the filesystem type deployed on media.
#[async_trait]
pub trait FsAdapter: Send + Sync {
    /// Mount point of `device` if it is currently mounted
    async fn mounted(&self, device: &Path) -> Result<Option<PathBuf>>;

    /// Mount `device` at `mount_point`, expecting the given volume label
    async fn mount(&self, device: &Path, mount_point: &Path, label: &str) -> Result<()>;

    /// Unmount `device` from `mount_point`
    async fn umount(&self, device: &Path, mount_point: &Path) -> Result<()>;

    /// Create a filesystem labelled `label` on `device`, returning the
    /// resulting space
    async fn format(&self, device: &Path, label: &str) -> Result<FsSpace>;

    /// Space usage of the filesystem mounted at `root`
    async fn df(&self, root: &Path) -> Result<FsSpace>;
}

// =============================================================================
// IO Adapter Port
// =============================================================================

/// Port to the extent I/O layer; the scheduler only needs its flush.
#[async_trait]
pub trait IoAdapter: Send + Sync {
    /// Flush all pending data and metadata for the filesystem at `root`
    async fn flush(&self, root: &Path) -> Result<()>;
}

// =============================================================================
// Adapter Registry
// =============================================================================

pub type MetadataStoreRef = Arc<dyn MetadataStore>;
pub type DeviceAdapterRef = Arc<dyn DeviceAdapter>;
pub type LibraryAdapterRef = Arc<dyn LibraryAdapter>;
pub type FsAdapterRef = Arc<dyn FsAdapter>;
pub type IoAdapterRef = Arc<dyn IoAdapter>;

/// Registry of adapters, keyed by device family and filesystem type.
#[derive(Default)]
pub struct AdapterRegistry {
    device: HashMap<FamilyKind, DeviceAdapterRef>,
    library: HashMap<FamilyKind, LibraryAdapterRef>,
    fs: HashMap<FsType, FsAdapterRef>,
    io: HashMap<FsType, IoAdapterRef>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_device(mut self, family: FamilyKind, adapter: DeviceAdapterRef) -> Self {
        self.device.insert(family, adapter);
        self
    }

    pub fn register_library(mut self, family: FamilyKind, adapter: LibraryAdapterRef) -> Self {
        self.library.insert(family, adapter);
        self
    }

    pub fn register_fs(mut self, fs: FsType, adapter: FsAdapterRef) -> Self {
        self.fs.insert(fs, adapter);
        self
    }

    pub fn register_io(mut self, fs: FsType, adapter: IoAdapterRef) -> Self {
        self.io.insert(fs, adapter);
        self
    }

    pub fn device_adapter(&self, family: FamilyKind) -> Result<DeviceAdapterRef> {
        self.device
            .get(&family)
            .cloned()
            .ok_or_else(|| Error::Unsupported(format!("device adapter for family '{family}'")))
    }

    pub fn library_adapter(&self, family: FamilyKind) -> Result<LibraryAdapterRef> {
        self.library
            .get(&family)
            .cloned()
            .ok_or_else(|| Error::Unsupported(format!("library adapter for family '{family}'")))
    }

    pub fn fs_adapter(&self, fs: FsType) -> Result<FsAdapterRef> {
        self.fs
            .get(&fs)
            .cloned()
            .ok_or_else(|| Error::Unsupported(format!("fs adapter for type '{fs}'")))
    }

    pub fn io_adapter(&self, fs: FsType) -> Result<IoAdapterRef> {
        self.io
            .get(&fs)
            .cloned()
            .ok_or_else(|| Error::Unsupported(format!("io adapter for type '{fs}'")))
    }
}
