//! Test Doubles
//!
//! In-memory stand-ins for the external collaborators: a metadata store
//! interpreting the JSON filter expressions, a scripted robotic library,
//! and device/filesystem/IO adapters. Shared by the unit and scenario
//! tests across the crate.

use crate::config::{DriveTypeSection, SchedulerConfig, TapeTypeSection};
use crate::domain::device::{AdminStatus, DeviceInfo, FamilyKind};
use crate::domain::filter;
use crate::domain::media::{
    AddrType, FsDescriptor, FsStatus, FsType, LockState, MediaStats, MediumId, MediumInfo, Tags,
};
use crate::domain::ports::{
    AdapterRegistry, DeviceAdapter, DriveSlot, FsAdapter, FsSpace, IoAdapter, LibAddress,
    LibElement, LibraryAdapter, MetadataStore, ObjectRecord, SysDeviceState,
};
use crate::error::{Error, Result};
use crate::scheduler::owner::host_short_name;
use crate::scheduler::Scheduler;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// =============================================================================
// Filter Evaluation
// =============================================================================

/// Evaluate a store filter expression against an attribute-mapped row.
pub fn filter_matches(expr: &Value, row: &Value) -> bool {
    let Some(obj) = expr.as_object() else {
        return false;
    };
    let Some((key, val)) = obj.iter().next() else {
        return false;
    };

    match key.as_str() {
        "$AND" => val
            .as_array()
            .is_some_and(|cs| cs.iter().all(|c| filter_matches(c, row))),
        "$NOR" => val
            .as_array()
            .is_some_and(|cs| !cs.iter().any(|c| filter_matches(c, row))),
        "$GTE" => {
            let Some(inner) = val.as_object() else {
                return false;
            };
            let Some((path, bound)) = inner.iter().next() else {
                return false;
            };
            match (row.get(path).and_then(Value::as_u64), bound.as_u64()) {
                (Some(actual), Some(bound)) => actual >= bound,
                _ => false,
            }
        }
        path => match row.get(path) {
            Some(Value::Array(items)) => items.contains(val),
            Some(v) => v == val,
            None => false,
        },
    }
}

fn device_row(d: &DeviceInfo) -> Value {
    json!({
        (filter::DEV_HOST): d.host,
        (filter::DEV_ADM_STATUS): d.adm_status,
        (filter::DEV_FAMILY): d.family,
    })
}

fn media_row(m: &MediumInfo) -> Value {
    json!({
        (filter::MDA_FAMILY): m.id.family,
        (filter::MDA_ID): m.id.label,
        (filter::MDA_ADM_STATUS): m.adm_status,
        (filter::MDA_VOL_FREE): m.stats.phys_spc_free,
        (filter::MDA_FS_STATUS): m.fs.status,
        (filter::MDA_TAGS): m.tags.0,
    })
}

fn object_row(o: &ObjectRecord) -> Value {
    json!({
        (filter::OBJ_OID): o.oid,
        (filter::OBJ_UUID): o.uuid,
        (filter::OBJ_VERSION): o.version,
    })
}

// =============================================================================
// Mock Metadata Store
// =============================================================================

#[derive(Default)]
struct StoreState {
    devices: Vec<DeviceInfo>,
    /// serial -> lock owner
    device_locks: HashMap<String, String>,
    /// Rows carry their persisted lock: `Owner` or `Unlocked`, never
    /// `External`.
    media: Vec<MediumInfo>,
    objects: Vec<ObjectRecord>,
}

/// In-memory metadata store with per-row lock registry.
#[derive(Default)]
pub struct MockStore {
    state: Mutex<StoreState>,
}

impl MockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_device(&self, info: DeviceInfo) {
        self.state.lock().unwrap().devices.push(info);
    }

    pub fn add_medium(&self, medium: MediumInfo) {
        self.state.lock().unwrap().media.push(medium);
    }

    pub fn add_object(&self, record: ObjectRecord) {
        self.state.lock().unwrap().objects.push(record);
    }

    /// Snapshot of a medium row, for assertions.
    pub fn medium(&self, label: &str) -> Option<MediumInfo> {
        self.state
            .lock()
            .unwrap()
            .media
            .iter()
            .find(|m| m.id.label == label)
            .cloned()
    }

    pub fn device_lock_owner(&self, serial: &str) -> Option<String> {
        self.state.lock().unwrap().device_locks.get(serial).cloned()
    }

    pub fn medium_lock_owner(&self, label: &str) -> Option<String> {
        self.medium(label)
            .and_then(|m| m.lock.owner().map(String::from))
    }

    /// Pretend another instance holds the lock on `label`.
    pub fn lock_medium_externally(&self, label: &str, owner: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(m) = state.media.iter_mut().find(|m| m.id.label == label) {
            m.lock = LockState::Owner(owner.to_string());
        }
    }
}

#[async_trait]
impl MetadataStore for MockStore {
    async fn device_get(&self, filter: &Value) -> Result<Vec<DeviceInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .devices
            .iter()
            .filter(|d| filter_matches(filter, &device_row(d)))
            .cloned()
            .collect())
    }

    async fn media_get(&self, filter: &Value) -> Result<Vec<MediumInfo>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .media
            .iter()
            .filter(|m| filter_matches(filter, &media_row(m)))
            .cloned()
            .collect())
    }

    async fn object_get(&self, filter: &Value) -> Result<Vec<ObjectRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|o| filter_matches(filter, &object_row(o)))
            .cloned()
            .collect())
    }

    async fn device_lock(&self, device: &DeviceInfo, owner: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(holder) = state.device_locks.get(&device.serial) {
            return Err(Error::Store(format!(
                "device '{}' already locked by '{holder}'",
                device.serial
            )));
        }
        state
            .device_locks
            .insert(device.serial.clone(), owner.to_string());
        Ok(())
    }

    async fn device_unlock(&self, device: &DeviceInfo, owner: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.device_locks.get(&device.serial) {
            Some(holder) if holder == owner => {
                state.device_locks.remove(&device.serial);
                Ok(())
            }
            Some(holder) => Err(Error::Store(format!(
                "device '{}' locked by '{holder}', not '{owner}'",
                device.serial
            ))),
            None => Err(Error::Store(format!(
                "device '{}' is not locked",
                device.serial
            ))),
        }
    }

    async fn media_lock(&self, medium: &MediumId, owner: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .media
            .iter_mut()
            .find(|m| m.id == *medium)
            .ok_or_else(|| Error::Store(format!("no medium row for '{medium}'")))?;

        match &row.lock {
            LockState::Unlocked => {
                row.lock = LockState::Owner(owner.to_string());
                Ok(())
            }
            LockState::Owner(holder) => Err(Error::Store(format!(
                "medium '{medium}' already locked by '{holder}'"
            ))),
            LockState::External => unreachable!("External is never persisted"),
        }
    }

    async fn media_unlock(&self, medium: &MediumId, owner: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .media
            .iter_mut()
            .find(|m| m.id == *medium)
            .ok_or_else(|| Error::Store(format!("no medium row for '{medium}'")))?;

        match &row.lock {
            LockState::Owner(holder) if holder == owner => {
                row.lock = LockState::Unlocked;
                Ok(())
            }
            _ => Err(Error::Store(format!(
                "medium '{medium}' is not locked by '{owner}'"
            ))),
        }
    }

    async fn media_update(&self, medium: &MediumInfo) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .media
            .iter_mut()
            .find(|m| m.id == medium.id)
            .ok_or_else(|| Error::Store(format!("no medium row for '{}'", medium.id)))?;

        // Everything but the lock slot, which only the lock calls touch.
        row.model = medium.model.clone();
        row.adm_status = medium.adm_status;
        row.fs = medium.fs.clone();
        row.addr_type = medium.addr_type;
        row.tags = medium.tags.clone();
        row.stats = medium.stats.clone();
        Ok(())
    }
}

// =============================================================================
// Mock Library
// =============================================================================

struct DriveBay {
    serial: String,
    label: Option<String>,
}

#[derive(Default)]
struct LibState {
    drives: Vec<DriveBay>,
    slots: Vec<Option<String>>,
    reject_drive_to_drive: bool,
}

/// Scripted robotic library for one family.
pub struct MockLibrary {
    family: FamilyKind,
    state: Mutex<LibState>,
}

impl MockLibrary {
    pub fn new(family: FamilyKind) -> Arc<Self> {
        Arc::new(Self {
            family,
            state: Mutex::new(LibState::default()),
        })
    }

    pub fn add_drive(&self, serial: &str) {
        self.state.lock().unwrap().drives.push(DriveBay {
            serial: serial.to_string(),
            label: None,
        });
    }

    pub fn add_drive_loaded(&self, serial: &str, label: &str) {
        self.state.lock().unwrap().drives.push(DriveBay {
            serial: serial.to_string(),
            label: Some(label.to_string()),
        });
    }

    pub fn add_slot(&self, label: &str) {
        self.state
            .lock()
            .unwrap()
            .slots
            .push(Some(label.to_string()));
    }

    pub fn set_reject_drive_to_drive(&self, reject: bool) {
        self.state.lock().unwrap().reject_drive_to_drive = reject;
    }

    /// Label in the drive with this serial, for assertions.
    pub fn drive_contents(&self, serial: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .drives
            .iter()
            .find(|d| d.serial == serial)
            .and_then(|d| d.label.clone())
    }

    /// True when `label` sits in a storage slot.
    pub fn in_slot(&self, label: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .slots
            .iter()
            .any(|s| s.as_deref() == Some(label))
    }
}

#[async_trait]
impl LibraryAdapter for MockLibrary {
    async fn drive_lookup(&self, serial: &str) -> Result<DriveSlot> {
        let state = self.state.lock().unwrap();
        let (i, bay) = state
            .drives
            .iter()
            .enumerate()
            .find(|(_, d)| d.serial == serial)
            .ok_or_else(|| Error::NoDevice(format!("no library drive with serial '{serial}'")))?;

        Ok(DriveSlot {
            address: LibAddress::new(LibElement::Drive, i as u64),
            full: bay.label.is_some(),
            medium: bay
                .label
                .as_ref()
                .map(|l| MediumId::new(self.family, l.clone())),
        })
    }

    async fn media_lookup(&self, label: &str) -> Result<LibAddress> {
        let state = self.state.lock().unwrap();
        if let Some(i) = state
            .drives
            .iter()
            .position(|d| d.label.as_deref() == Some(label))
        {
            return Ok(LibAddress::new(LibElement::Drive, i as u64));
        }
        if let Some(i) = state
            .slots
            .iter()
            .position(|s| s.as_deref() == Some(label))
        {
            return Ok(LibAddress::new(LibElement::Slot, i as u64));
        }
        Err(Error::NoSuchMedium(label.to_string()))
    }

    async fn media_move(&self, src: &LibAddress, dst: &LibAddress) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        if state.reject_drive_to_drive
            && src.kind == LibElement::Drive
            && dst.kind == LibElement::Drive
        {
            return Err(Error::InvalidArgument(
                "drive-to-drive motion refused".into(),
            ));
        }

        let label = match src.kind {
            LibElement::Drive => state
                .drives
                .get_mut(src.index as usize)
                .and_then(|d| d.label.take()),
            LibElement::Slot => state
                .slots
                .get_mut(src.index as usize)
                .and_then(Option::take),
            _ => None,
        }
        .ok_or_else(|| Error::InvalidArgument(format!("no medium at source {src:?}")))?;

        match dst.kind {
            LibElement::Drive => {
                let bay = state.drives.get_mut(dst.index as usize).ok_or_else(|| {
                    Error::InvalidArgument(format!("no drive at destination {dst:?}"))
                })?;
                if bay.label.is_some() {
                    return Err(Error::InvalidArgument(format!(
                        "destination drive {} is full",
                        dst.index
                    )));
                }
                bay.label = Some(label);
            }
            LibElement::Slot => {
                let slot = state.slots.get_mut(dst.index as usize).ok_or_else(|| {
                    Error::InvalidArgument(format!("no slot at destination {dst:?}"))
                })?;
                if slot.is_some() {
                    return Err(Error::InvalidArgument(format!(
                        "destination slot {} is full",
                        dst.index
                    )));
                }
                *slot = Some(label);
            }
            LibElement::Unknown => {
                // The library chooses any free slot.
                if let Some(free) = state.slots.iter_mut().find(|s| s.is_none()) {
                    *free = Some(label);
                } else {
                    state.slots.push(Some(label));
                }
            }
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported destination {dst:?}"
                )))
            }
        }
        Ok(())
    }
}

// =============================================================================
// Mock Device Adapter
// =============================================================================

struct DeviceProfile {
    path: PathBuf,
    model: Option<String>,
}

/// Serial -> path/identity resolution.
#[derive(Default)]
pub struct MockDeviceAdapter {
    profiles: Mutex<HashMap<String, DeviceProfile>>,
}

impl MockDeviceAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, serial: &str, model: Option<&str>) {
        self.register_at(serial, PathBuf::from(format!("/dev/mock/{serial}")), model);
    }

    pub fn register_at(&self, serial: &str, path: PathBuf, model: Option<&str>) {
        self.profiles.lock().unwrap().insert(
            serial.to_string(),
            DeviceProfile {
                path,
                model: model.map(String::from),
            },
        );
    }
}

#[async_trait]
impl DeviceAdapter for MockDeviceAdapter {
    async fn lookup(&self, serial: &str) -> Result<PathBuf> {
        self.profiles
            .lock()
            .unwrap()
            .get(serial)
            .map(|p| p.path.clone())
            .ok_or_else(|| Error::NoDevice(format!("no device with serial '{serial}'")))
    }

    async fn query(&self, path: &Path) -> Result<SysDeviceState> {
        let profiles = self.profiles.lock().unwrap();
        let (serial, profile) = profiles
            .iter()
            .find(|(_, p)| p.path == path)
            .ok_or_else(|| Error::Adapter {
                device: path.display().to_string(),
                reason: "unknown device".into(),
            })?;

        Ok(SysDeviceState {
            model: profile.model.clone(),
            serial: Some(serial.clone()),
        })
    }
}

// =============================================================================
// Mock Filesystem Adapter
// =============================================================================

struct Volume {
    space: FsSpace,
}

struct FsState {
    volumes: HashMap<String, Volume>,
    /// device path -> (mount root, label)
    mounts: HashMap<PathBuf, (PathBuf, String)>,
    /// mount root -> label
    roots: HashMap<PathBuf, String>,
    format_space: FsSpace,
}

/// In-memory filesystem adapter tracking volumes and mounts by label.
pub struct MockFs {
    state: Mutex<FsState>,
}

impl MockFs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FsState {
                volumes: HashMap::new(),
                mounts: HashMap::new(),
                roots: HashMap::new(),
                format_space: FsSpace {
                    used: 0,
                    avail: 1 << 40,
                    readonly: false,
                },
            }),
        })
    }

    pub fn add_volume(&self, label: &str, used: u64, avail: u64) {
        self.state.lock().unwrap().volumes.insert(
            label.to_string(),
            Volume {
                space: FsSpace {
                    used,
                    avail,
                    readonly: false,
                },
            },
        );
    }

    pub fn set_readonly(&self, label: &str, readonly: bool) {
        if let Some(v) = self.state.lock().unwrap().volumes.get_mut(label) {
            v.space.readonly = readonly;
        }
    }

    pub fn set_space(&self, label: &str, used: u64, avail: u64) {
        if let Some(v) = self.state.lock().unwrap().volumes.get_mut(label) {
            v.space.used = used;
            v.space.avail = avail;
        }
    }

    pub fn is_mounted(&self, device: &Path) -> bool {
        self.state.lock().unwrap().mounts.contains_key(device)
    }
}

#[async_trait]
impl FsAdapter for MockFs {
    async fn mounted(&self, device: &Path) -> Result<Option<PathBuf>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .mounts
            .get(device)
            .map(|(root, _)| root.clone()))
    }

    async fn mount(&self, device: &Path, mount_point: &Path, label: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.volumes.contains_key(label) {
            return Err(Error::Adapter {
                device: device.display().to_string(),
                reason: format!("no volume labelled '{label}'"),
            });
        }
        if state.mounts.contains_key(device) {
            return Err(Error::Adapter {
                device: device.display().to_string(),
                reason: "already mounted".into(),
            });
        }
        state
            .mounts
            .insert(device.to_path_buf(), (mount_point.to_path_buf(), label.into()));
        state.roots.insert(mount_point.to_path_buf(), label.into());
        Ok(())
    }

    async fn umount(&self, device: &Path, mount_point: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.mounts.remove(device).ok_or_else(|| Error::Adapter {
            device: device.display().to_string(),
            reason: "not mounted".into(),
        })?;
        state.roots.remove(mount_point);
        Ok(())
    }

    async fn format(&self, device: &Path, label: &str) -> Result<FsSpace> {
        let mut state = self.state.lock().unwrap();
        if state.volumes.contains_key(label) {
            return Err(Error::Adapter {
                device: device.display().to_string(),
                reason: format!("volume '{label}' already formatted"),
            });
        }
        let space = state.format_space;
        state.volumes.insert(label.to_string(), Volume { space });
        Ok(space)
    }

    async fn df(&self, root: &Path) -> Result<FsSpace> {
        let state = self.state.lock().unwrap();
        let label = state.roots.get(root).ok_or_else(|| Error::Adapter {
            device: root.display().to_string(),
            reason: "nothing mounted here".into(),
        })?;
        Ok(state.volumes[label].space)
    }
}

// =============================================================================
// Mock IO Adapter
// =============================================================================

/// Records flushes; can be scripted to fail with a whole-medium error.
#[derive(Default)]
pub struct MockIo {
    flushed: Mutex<Vec<PathBuf>>,
    fail_full: Mutex<bool>,
}

impl MockIo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_full(&self, fail: bool) {
        *self.fail_full.lock().unwrap() = fail;
    }

    pub fn flush_count(&self) -> usize {
        self.flushed.lock().unwrap().len()
    }
}

#[async_trait]
impl IoAdapter for MockIo {
    async fn flush(&self, root: &Path) -> Result<()> {
        if *self.fail_full.lock().unwrap() {
            return Err(Error::NoSpace { required: 0 });
        }
        self.flushed.lock().unwrap().push(root.to_path_buf());
        Ok(())
    }
}

// =============================================================================
// Test Bed
// =============================================================================

/// One host's worth of mocks, wired into a scheduler on demand.
pub struct TestBed {
    pub store: Arc<MockStore>,
    pub library: Arc<MockLibrary>,
    pub devices: Arc<MockDeviceAdapter>,
    pub fs: Arc<MockFs>,
    pub io: Arc<MockIo>,
    pub family: FamilyKind,
}

impl TestBed {
    pub fn tape() -> Self {
        Self {
            store: MockStore::new(),
            library: MockLibrary::new(FamilyKind::Tape),
            devices: MockDeviceAdapter::new(),
            fs: MockFs::new(),
            io: MockIo::new(),
            family: FamilyKind::Tape,
        }
    }

    /// Configuration with an LTO5/LTO6 compatibility matrix.
    pub fn tape_config() -> SchedulerConfig {
        let mut config = SchedulerConfig {
            default_family: FamilyKind::Tape,
            ..Default::default()
        };
        config.drive_type.insert(
            "LTO5_drive".into(),
            DriveTypeSection {
                models: vec!["ULTRIUM-TD5".into()],
            },
        );
        config.drive_type.insert(
            "LTO6_drive".into(),
            DriveTypeSection {
                models: vec!["ULTRIUM-TD6".into()],
            },
        );
        config.tape_type.insert(
            "LTO5".into(),
            TapeTypeSection {
                drive_rw: vec!["LTO5_drive".into(), "LTO6_drive".into()],
            },
        );
        config.tape_type.insert(
            "LTO6".into(),
            TapeTypeSection {
                drive_rw: vec!["LTO6_drive".into()],
            },
        );
        config
    }

    pub fn scheduler(&self, config: SchedulerConfig) -> Scheduler {
        let adapters = AdapterRegistry::new()
            .register_device(self.family, self.devices.clone())
            .register_library(self.family, self.library.clone())
            .register_fs(FsType::Ltfs, self.fs.clone())
            .register_fs(FsType::Posix, self.fs.clone())
            .register_io(FsType::Ltfs, self.io.clone())
            .register_io(FsType::Posix, self.io.clone());

        Scheduler::new(self.store.clone(), adapters, config).unwrap()
    }

    /// Register a drive on this host: store row, system profile and
    /// library bay.
    pub fn add_drive(&self, serial: &str, model: &str) {
        self.store.add_device(DeviceInfo {
            family: self.family,
            serial: serial.to_string(),
            model: Some(model.to_string()),
            host: host_short_name().unwrap(),
            adm_status: AdminStatus::Unlocked,
        });
        self.devices.register(serial, Some(model));
        self.library.add_drive(serial);
    }

    /// Register a medium sitting in a library slot, with a formatted
    /// filesystem of `free` available bytes.
    pub fn add_tape(&self, label: &str, model: &str, free: u64, tags: Tags, status: FsStatus) {
        self.store.add_medium(MediumInfo {
            id: MediumId::new(self.family, label),
            model: Some(model.to_string()),
            adm_status: AdminStatus::Unlocked,
            fs: FsDescriptor {
                kind: FsType::Ltfs,
                label: label.to_string(),
                status,
            },
            addr_type: AddrType::Hash,
            tags,
            stats: MediaStats {
                phys_spc_free: free,
                ..Default::default()
            },
            lock: LockState::Unlocked,
        });
        self.library.add_slot(label);
        if status != FsStatus::Blank {
            self.fs.add_volume(label, 0, free);
        }
    }

    /// Register a blank, admin-locked medium awaiting format.
    pub fn add_blank_tape(&self, label: &str, model: &str) {
        self.store.add_medium(MediumInfo {
            id: MediumId::new(self.family, label),
            model: Some(model.to_string()),
            adm_status: AdminStatus::Locked,
            fs: FsDescriptor {
                kind: FsType::Ltfs,
                label: String::new(),
                status: FsStatus::Blank,
            },
            addr_type: AddrType::Hash,
            tags: Tags::none(),
            stats: MediaStats::default(),
            lock: LockState::Unlocked,
        });
        self.library.add_slot(label);
    }
}
