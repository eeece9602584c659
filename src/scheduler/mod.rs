//! Local Resource Scheduler
//!
//! Arbitrates access to this host's media resources: drives, media held in
//! the library, and their shared locks in the metadata store. Serves store
//! operations by selecting, loading, mounting and locking the right
//! (drive, medium) pair, returned to the caller as an [`Intent`].
//!
//! One instance schedules one host. Entry points serialize behind a single
//! async mutex; parallelism exists across instances on different hosts,
//! coordinating only through the store's lock registry. Lock order is
//! always medium first, then device; release order is the reverse.

pub(crate) mod cache;
pub mod compat;
pub mod device;
pub mod intent;
pub(crate) mod motion;
pub mod owner;
pub mod picker;
pub(crate) mod select;

use crate::config::SchedulerConfig;
use crate::domain::device::FamilyKind;
use crate::domain::filter;
use crate::domain::media::{FsStatus, FsType, LockState, MediumId, MediumInfo, Tags};
use crate::domain::ports::{AdapterRegistry, MetadataStoreRef};
use crate::error::{Error, Result};
use cache::DeviceCache;
use compat::CompatMatrix;
use device::{DeviceDescriptor, DeviceStatus};
use intent::Intent;
use owner::LockOwner;
use picker::PickPolicy;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

// =============================================================================
// Operations
// =============================================================================

/// What a medium is being prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaOp {
    Read,
    Write,
    Format,
}

/// Key identifying an object for [`Scheduler::locate`].
#[derive(Debug, Clone)]
pub enum ObjectKey {
    Oid(String),
    Uuid(String),
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKey::Oid(oid) => write!(f, "oid={oid}"),
            ObjectKey::Uuid(uuid) => write!(f, "uuid={uuid}"),
        }
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// One host's media scheduler instance.
///
/// Dropping the scheduler tears down the in-memory device cache; locks
/// still held in the store at that point must be reclaimed by an
/// administrator, exactly as after a crash.
pub struct Scheduler {
    pub(crate) dss: MetadataStoreRef,
    pub(crate) adapters: AdapterRegistry,
    pub(crate) config: SchedulerConfig,
    pub(crate) compat: CompatMatrix,
    pub(crate) owner: LockOwner,
    pub(crate) cache: Mutex<DeviceCache>,
}

impl Scheduler {
    /// Create a scheduler instance over a metadata store and a set of
    /// adapters.
    pub fn new(
        dss: MetadataStoreRef,
        adapters: AdapterRegistry,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let owner = LockOwner::generate()?;
        debug!("Scheduler lock owner: {owner}");

        Ok(Self {
            compat: CompatMatrix::from_config(&config),
            dss,
            adapters,
            config,
            owner,
            cache: Mutex::new(DeviceCache::new()),
        })
    }

    /// The identity under which this instance takes shared locks.
    pub fn lock_owner(&self) -> &str {
        self.owner.as_str()
    }

    // =========================================================================
    // Lock Management
    // =========================================================================

    /// Lock a device row to prevent concurrent access. Acquiring a device
    /// we already hold is a no-op.
    pub(crate) async fn dev_acquire(&self, dev: &mut DeviceDescriptor) -> Result<()> {
        if dev.locked_local {
            debug!("Device '{}' already locked (ignoring)", dev.path.display());
            return Ok(());
        }

        if let Err(e) = self.dss.device_lock(&dev.info, self.owner.as_str()).await {
            warn!("Cannot lock device '{}': {e}", dev.path.display());
            return Err(e);
        }

        debug!("Acquired ownership on device '{}'", dev.path.display());
        dev.locked_local = true;
        Ok(())
    }

    /// Unlock a device row. Releasing a device we do not hold is a no-op.
    pub(crate) async fn dev_release(&self, dev: &mut DeviceDescriptor) -> Result<()> {
        if !dev.locked_local {
            debug!("Device '{}' is not locked (ignoring)", dev.path.display());
            return Ok(());
        }

        self.dss
            .device_unlock(&dev.info, self.owner.as_str())
            .await?;

        debug!("Released ownership on device '{}'", dev.path.display());
        dev.locked_local = false;
        Ok(())
    }

    /// Lock a medium row. On failure the in-memory record is marked
    /// externally locked so it will not be retried before a re-query.
    pub(crate) async fn media_acquire(&self, medium: &mut MediumInfo) -> Result<()> {
        if let Err(e) = self.dss.media_lock(&medium.id, self.owner.as_str()).await {
            medium.lock = LockState::External;
            warn!("Cannot lock medium '{}': {e}", medium.id);
            return Err(e);
        }

        medium.lock = LockState::Owner(self.owner.as_str().to_string());
        debug!("Acquired ownership on medium '{}'", medium.id);
        Ok(())
    }

    /// Unlock a medium row.
    pub(crate) async fn media_release(&self, id: &MediumId) -> Result<()> {
        self.dss.media_unlock(id, self.owner.as_str()).await?;
        debug!("Released ownership on medium '{id}'");
        Ok(())
    }

    /// Drop both locks held through a device descriptor: the device lock,
    /// then the lock of the medium it contains.
    pub(crate) async fn release_device_locks(&self, dev: &mut DeviceDescriptor) {
        if let Err(e) = self.dev_release(dev).await {
            warn!("Failed to release device '{}': {e}", dev.path.display());
        }
        if let Some(id) = dev.medium.as_ref().map(|m| m.id.clone()) {
            if let Err(e) = self.media_release(&id).await {
                warn!("Failed to release medium '{id}': {e}");
            }
            if let Some(m) = dev.medium.as_mut() {
                m.lock = LockState::Unlocked;
            }
        }
    }

    // =========================================================================
    // Medium Preparation
    // =========================================================================

    /// Bring the medium `id` into a local drive, locked, mounting it for
    /// read/write operations.
    ///
    /// On success both the medium and the chosen device are locked and the
    /// medium record is owned by the device descriptor; the caller is
    /// responsible for releasing both locks. On error every lock acquired
    /// by this call has been released.
    async fn media_prepare(
        &self,
        cache: &mut DeviceCache,
        id: &MediumId,
        op: MediaOp,
    ) -> Result<usize> {
        let mut med = self.fill_media_info(id).await?;

        if med.lock.is_external() {
            debug!("Medium '{id}' is locked, returning to caller");
            return Err(Error::Retry(format!("medium '{id}' is locked")));
        }

        let post_fs_mount = match op {
            MediaOp::Read | MediaOp::Write => {
                if med.fs.status == FsStatus::Blank {
                    return Err(Error::InvalidArgument(format!(
                        "cannot do I/O on unformatted medium '{id}'"
                    )));
                }
                true
            }
            MediaOp::Format => {
                if med.fs.status != FsStatus::Blank {
                    return Err(Error::InvalidArgument(format!(
                        "cannot format non-blank medium '{id}'"
                    )));
                }
                false
            }
        };

        if self.media_acquire(&mut med).await.is_err() {
            return Err(Error::Retry(format!("medium '{id}' is locked")));
        }

        let idx = if let Some(idx) = cache.search_loaded(id) {
            // The medium is already in a drive. Media are locked before
            // drives, so the device lock should be free.
            if self.dev_acquire(&mut cache.devices[idx]).await.is_err() {
                let _ = self.media_release(id).await;
                return Err(Error::Retry(format!(
                    "cannot acquire the device holding '{id}'"
                )));
            }
            // Refresh the descriptor with the fresh medium record.
            cache.devices[idx].medium = Some(med);
            idx
        } else {
            info!("Medium '{id}' is not in a drive");

            let picked = self
                .pick_device(
                    cache,
                    Some(DeviceStatus::Empty),
                    PickPolicy::Any,
                    0,
                    &Tags::none(),
                    Some(&med),
                )
                .await?;

            let idx = match picked {
                Some(idx) => idx,
                None => {
                    info!("No free drive: need to unload one");
                    match self.free_one_device(cache, &med).await {
                        Ok(idx) => idx,
                        Err(e) => {
                            let _ = self.media_release(id).await;
                            return Err(e);
                        }
                    }
                }
            };

            match self.load(&mut cache.devices[idx], med).await {
                Ok(()) => {}
                Err(e) => {
                    let _ = self.dev_release(&mut cache.devices[idx]).await;
                    let _ = self.media_release(id).await;
                    // The library could not move the medium between two
                    // drives: the whole request can be retried.
                    return Err(match e {
                        Error::Busy(msg) => Error::Retry(msg),
                        other => other,
                    });
                }
            }
            idx
        };

        if post_fs_mount && cache.devices[idx].status != DeviceStatus::Mounted {
            if let Err(e) = self.mount(&mut cache.devices[idx]).await {
                let _ = self.dev_release(&mut cache.devices[idx]).await;
                let _ = self.media_release(id).await;
                return Err(e);
            }
        }

        Ok(idx)
    }

    // =========================================================================
    // Write Resource Acquisition
    // =========================================================================

    /// Get a mounted, locked device ready to absorb `size` bytes.
    async fn get_write_res(
        &self,
        cache: &mut DeviceCache,
        size: u64,
        tags: &Tags,
    ) -> Result<usize> {
        self.load_dev_state(cache).await?;

        let policy: PickPolicy = self.config.policy.into();

        // 1a) is there a mounted filesystem with enough room?
        if let Some(idx) = self
            .pick_device(cache, Some(DeviceStatus::Mounted), policy, size, tags, None)
            .await?
        {
            return Ok(idx);
        }

        // 1b) is there a loaded medium with enough room?
        if let Some(idx) = self
            .pick_device(cache, Some(DeviceStatus::Loaded), policy, size, tags, None)
            .await?
        {
            if let Err(e) = self.mount(&mut cache.devices[idx]).await {
                self.release_device_locks(&mut cache.devices[idx]).await;
                return Err(e);
            }
            return Ok(idx);
        }

        // 2) no resident medium fits: select a new one. The selector
        // returns it locked.
        info!("Not enough space on loaded media: selecting another one");
        let pmedia = self
            .select_media(size, self.config.default_family, tags)
            .await?;
        let pmedia_id = pmedia.id.clone();

        // The medium may already be in a drive on this host. Media are
        // locked before drives, so acquiring that drive should not fail.
        if let Some(idx) = cache.search_loaded(&pmedia_id) {
            if self.dev_acquire(&mut cache.devices[idx]).await.is_err() {
                let _ = self.media_release(&pmedia_id).await;
                return Err(Error::Retry(format!(
                    "cannot acquire the device holding '{pmedia_id}'"
                )));
            }
            cache.devices[idx].medium = Some(pmedia);
            return Ok(idx);
        }

        // 3) is there a free drive?
        let idx = match self
            .pick_device(
                cache,
                Some(DeviceStatus::Empty),
                PickPolicy::Any,
                0,
                &Tags::none(),
                Some(&pmedia),
            )
            .await?
        {
            Some(idx) => idx,
            None => {
                info!("No free drive: need to unload one");
                match self.free_one_device(cache, &pmedia).await {
                    Ok(idx) => idx,
                    Err(e) => {
                        let _ = self.media_release(&pmedia_id).await;
                        return Err(e);
                    }
                }
            }
        };

        // 4) load the selected medium into the selected drive
        if let Err(e) = self.load(&mut cache.devices[idx], pmedia).await {
            let _ = self.dev_release(&mut cache.devices[idx]).await;
            let _ = self.media_release(&pmedia_id).await;
            return Err(match e {
                Error::Busy(msg) => Error::Retry(msg),
                other => other,
            });
        }

        // 5) mount the filesystem
        if let Err(e) = self.mount(&mut cache.devices[idx]).await {
            self.release_device_locks(&mut cache.devices[idx]).await;
            return Err(e);
        }

        Ok(idx)
    }

    /// Build the intent for a prepared write device, checking that the
    /// mount is actually writable. Returns `None` after marking the medium
    /// full when the filesystem came up read-only: the caller retries.
    async fn writable_intent(
        &self,
        cache: &mut DeviceCache,
        idx: usize,
        size: u64,
    ) -> Result<Option<Intent>> {
        let intent = Self::intent_from_device(&cache.devices[idx], idx, size)?;

        let root = intent.root_path.clone().ok_or_else(|| {
            Error::InvalidArgument("prepared device has no mount root".into())
        })?;

        // Almost-full media can come up mounted read-only, and so would
        // damaged disks. Mark the medium full and let the caller retry.
        let fsa = self.adapters.fs_adapter(intent.fs_type)?;
        let space = fsa.df(&root).await?;
        if !space.readonly {
            return Ok(Some(intent));
        }

        warn!(
            "Medium '{}' OK but mounted R/O, marking full and retrying...",
            intent.medium
        );

        if let Some(medium) = cache.devices[idx].medium.as_mut() {
            medium.fs.status = FsStatus::Full;
            let snapshot = medium.clone();
            self.dss.media_update(&snapshot).await?;
        }

        self.release_device_locks(&mut cache.devices[idx]).await;
        Ok(None)
    }

    fn intent_from_device(dev: &DeviceDescriptor, idx: usize, size: u64) -> Result<Intent> {
        let (medium, root) = match (&dev.medium, &dev.mount_path) {
            (Some(medium), Some(root)) => (medium, root),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "device '{}' is not ready for I/O",
                    dev.path.display()
                )))
            }
        };

        Ok(Intent {
            root_path: Some(root.clone()),
            medium: medium.id.clone(),
            fs_type: medium.fs.kind,
            addr_type: medium.addr_type,
            size,
            device_slot: Some(idx),
        })
    }

    // =========================================================================
    // Client Operations
    // =========================================================================

    /// Allocate a medium and device able to absorb `size` bytes on media
    /// carrying all of `tags`, mount it, and return the reservation.
    pub async fn write_prepare(&self, size: u64, tags: &Tags) -> Result<Intent> {
        let mut cache = self.cache.lock().await;

        loop {
            let idx = self.get_write_res(&mut cache, size, tags).await?;

            match self.writable_intent(&mut cache, idx, size).await {
                Ok(Some(intent)) => {
                    let dev = &cache.devices[idx];
                    info!(
                        "Writing to medium '{}' using device '{}' (free space: {} bytes)",
                        intent.medium,
                        dev.path.display(),
                        dev.medium_free().unwrap_or(0)
                    );
                    return Ok(intent);
                }
                Ok(None) => continue,
                Err(e) => {
                    self.release_device_locks(&mut cache.devices[idx]).await;
                    return Err(e);
                }
            }
        }
    }

    /// Resolve the medium an intent refers to for reading: load and mount
    /// it if needed, and return the filled reservation.
    pub async fn read_prepare(&self, id: &MediumId) -> Result<Intent> {
        let mut cache = self.cache.lock().await;

        self.load_dev_state(&mut cache).await?;

        let idx = self.media_prepare(&mut cache, id, MediaOp::Read).await?;

        let dev = &cache.devices[idx];
        if let (Some(medium), Some(root)) = (&dev.medium, &dev.mount_path) {
            return Ok(Intent {
                root_path: Some(root.clone()),
                medium: medium.id.clone(),
                fs_type: medium.fs.kind,
                addr_type: medium.addr_type,
                size: 0,
                device_slot: Some(idx),
            });
        }

        let e = Error::InvalidArgument(format!("invalid device state, expected medium '{id}'"));
        self.release_device_locks(&mut cache.devices[idx]).await;
        Err(e)
    }

    /// Format a blank medium as `fs`, optionally clearing its
    /// administrative lock. Device and medium locks are released on exit
    /// regardless of partial failure.
    pub async fn format(&self, id: &MediumId, fs: FsType, unlock: bool) -> Result<()> {
        let mut cache = self.cache.lock().await;

        self.load_dev_state(&mut cache).await?;

        let idx = self.media_prepare(&mut cache, id, MediaOp::Format).await?;

        // -- from now on, the device is owned --

        let result = self.do_format(&mut cache, idx, id, fs, unlock).await;

        // Release ownership. Do not fail the whole operation if unlucky
        // here.
        if let Err(e) = self.dev_release(&mut cache.devices[idx]).await {
            error!("Failed to release lock on device {idx}: {e}");
        }
        if let Err(e) = self.media_release(id).await {
            error!("Failed to release lock on '{id}': {e}");
        }
        if let Some(m) = cache.devices[idx].medium.as_mut() {
            m.lock = LockState::Unlocked;
        }

        result
    }

    async fn do_format(
        &self,
        cache: &mut DeviceCache,
        idx: usize,
        id: &MediumId,
        fs: FsType,
        unlock: bool,
    ) -> Result<()> {
        if cache.devices[idx].medium.is_none() {
            return Err(Error::InvalidArgument("invalid device state".into()));
        }

        info!("Formatting medium '{id}' as {fs}");

        let path = cache.devices[idx].path.clone();
        let fsa = self.adapters.fs_adapter(fs)?;
        let space = fsa.format(&path, &id.label).await.map_err(|e| {
            warn!("Cannot format medium '{id}': {e}");
            e
        })?;

        let Some(medium) = cache.devices[idx].medium.as_mut() else {
            return Err(Error::InvalidArgument("invalid device state".into()));
        };

        // The medium id is systematically used as filesystem label.
        medium.fs.kind = fs;
        medium.fs.label = id.label.clone();
        medium.fs.status = FsStatus::Empty;
        medium.stats.phys_spc_used = space.used;
        medium.stats.phys_spc_free = space.avail;

        if unlock {
            info!("Unlocking medium '{id}'");
            medium.adm_status = crate::domain::device::AdminStatus::Unlocked;
        }

        let snapshot = medium.clone();
        self.dss.media_update(&snapshot).await.map_err(|e| {
            warn!("Failed to update state of medium '{id}': {e}");
            e
        })
    }

    /// Persist post-I/O state: flush the medium, refresh its statistics,
    /// and record fragment counters. A global media error reported by the
    /// caller or hit during the flush marks the medium full.
    pub async fn io_complete(
        &self,
        intent: &mut Intent,
        fragments: u64,
        err_code: i32,
    ) -> Result<()> {
        let mut cache = self.cache.lock().await;

        let root = intent
            .root_path
            .clone()
            .ok_or_else(|| Error::InvalidArgument("intent has no root path".into()))?;

        let ioa = self.adapters.io_adapter(intent.fs_type)?;

        let mut is_full = Error::code_is_media_global(err_code);

        match ioa.flush(&root).await {
            Ok(()) => {}
            Err(e) if Error::code_is_media_global(e.errno()) => is_full = true,
            Err(e) => {
                warn!("Cannot flush media at '{}': {e}", root.display());
                return Err(e);
            }
        }

        let idx = intent
            .device_slot
            .ok_or_else(|| Error::InvalidArgument("intent does not own a device".into()))?;

        let fsa = self.adapters.fs_adapter(intent.fs_type)?;
        let space = fsa.df(&root).await.map_err(|e| {
            warn!("Cannot retrieve media usage information: {e}");
            e
        })?;

        let Some(medium) = cache.devices[idx].medium.as_mut() else {
            return Err(Error::InvalidArgument(
                "intent device holds no medium".into(),
            ));
        };

        medium.stats.nb_obj += fragments;
        medium.stats.phys_spc_used = space.used;
        medium.stats.phys_spc_free = space.avail;
        if fragments > 0 {
            medium.stats.logc_spc_used += intent.size;
        }
        if err_code != 0 {
            medium.stats.nb_errors += 1;
        }

        if medium.fs.status == FsStatus::Empty {
            medium.fs.status = FsStatus::Used;
        }
        if is_full || medium.stats.phys_spc_free == 0 {
            medium.fs.status = FsStatus::Full;
        }

        let snapshot = medium.clone();
        self.dss.media_update(&snapshot).await.map_err(|e| {
            warn!("Cannot update media information: {e}");
            e
        })
    }

    /// Release the device and medium locks held by an intent. Releasing an
    /// already-released intent is a no-op.
    pub async fn resource_release(&self, intent: &mut Intent) -> Result<()> {
        let mut cache = self.cache.lock().await;

        if let Some(idx) = intent.device_slot.take() {
            self.release_device_locks(&mut cache.devices[idx]).await;
        }

        intent.root_path = None;
        Ok(())
    }

    /// Report the host currently holding the medium on which the given
    /// object lives, if any.
    pub async fn locate(&self, key: &ObjectKey, version: Option<u32>) -> Result<Option<String>> {
        let query = match key {
            ObjectKey::Oid(oid) => filter::object_by_oid(oid, version),
            ObjectKey::Uuid(uuid) => filter::object_by_uuid(uuid, version),
        };

        let records = self.dss.object_get(&query).await?;

        let uuids: HashSet<&str> = records.iter().map(|r| r.uuid.as_str()).collect();
        if uuids.len() > 1 {
            return Err(Error::AmbiguousObject(key.to_string()));
        }

        let Some(record) = records.iter().max_by_key(|r| r.version) else {
            return Err(Error::NoSuchObject(key.to_string()));
        };

        let rows = self
            .dss
            .media_get(&filter::medium_by_id(&record.medium))
            .await?;
        let Some(medium) = rows.first() else {
            return Err(Error::NoSuchMedium(record.medium.to_string()));
        };

        Ok(medium
            .lock
            .owner()
            .and_then(owner::owner_hostname)
            .map(String::from))
    }

    /// Default family this instance schedules, from configuration.
    pub fn family(&self) -> FamilyKind {
        self.config.default_family
    }
}
