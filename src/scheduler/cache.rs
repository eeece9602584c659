//! Device Cache
//!
//! In-memory mirror of the host's usable drives, populated from the
//! metadata store on first use and refreshed in place afterwards. A refresh
//! failure on one device demotes only that device to `Failed`; it never
//! fails the whole operation.

use crate::domain::filter;
use crate::domain::media::{LockState, MediumId, MediumInfo};
use crate::domain::ports::LibraryAdapterRef;
use crate::error::{Error, Result};
use crate::scheduler::device::{DeviceDescriptor, DeviceStatus};
use crate::scheduler::{owner, Scheduler};
use tracing::{debug, info, warn};

// =============================================================================
// Device Cache
// =============================================================================

/// The set of device descriptors this instance schedules over.
#[derive(Debug, Default)]
pub(crate) struct DeviceCache {
    pub(crate) devices: Vec<DeviceDescriptor>,
}

impl DeviceCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Index of the drive currently holding `id`, if any.
    pub(crate) fn search_loaded(&self, id: &MediumId) -> Option<usize> {
        for (i, dev) in self.devices.iter().enumerate() {
            if dev.status != DeviceStatus::Mounted && dev.status != DeviceStatus::Loaded {
                continue;
            }

            if dev.slot.full && dev.slot.medium.is_none() {
                warn!(
                    "Cannot retrieve medium id from device '{}'",
                    dev.path.display()
                );
                continue;
            }

            if dev.holds(id) {
                return Some(i);
            }
        }
        None
    }
}

// =============================================================================
// Refresh
// =============================================================================

/// Check that device info from the store is consistent with the actual
/// device. Absent values on both sides are accepted.
fn check_dev_info(dev: &DeviceDescriptor) -> Result<()> {
    match (&dev.info.model, &dev.sys.model) {
        (None, None) => debug!("{}: no device model is set", dev.path.display()),
        (Some(registered), Some(actual)) if registered != actual => {
            return Err(Error::DeviceMismatch {
                path: dev.path.display().to_string(),
                reason: format!(
                    "configured model '{registered}' differs from actual model '{actual}'"
                ),
            });
        }
        (Some(_), Some(_)) => {}
        _ => {
            return Err(Error::DeviceMismatch {
                path: dev.path.display().to_string(),
                reason: "missing or unexpected device model".into(),
            });
        }
    }

    match (&dev.info.serial, &dev.sys.serial) {
        (registered, Some(actual)) if registered != actual => Err(Error::DeviceMismatch {
            path: dev.path.display().to_string(),
            reason: format!(
                "configured serial '{registered}' differs from actual serial '{actual}'"
            ),
        }),
        (_, None) => Err(Error::DeviceMismatch {
            path: dev.path.display().to_string(),
            reason: "missing or unexpected device serial".into(),
        }),
        _ => Ok(()),
    }
}

impl Scheduler {
    /// Retrieve the medium row for `id`, marking any foreign lock as
    /// external in the returned record.
    pub(crate) async fn fill_media_info(&self, id: &MediumId) -> Result<MediumInfo> {
        debug!("Retrieving medium info for '{id}'");

        let mut rows = self.dss.media_get(&filter::medium_by_id(id)).await?;

        if rows.len() > 1 {
            return Err(Error::AmbiguousMedium(id.to_string()));
        }
        let Some(mut medium) = rows.pop() else {
            info!("No medium found matching '{id}'");
            return Err(Error::NoSuchMedium(id.to_string()));
        };

        // A lock held by anyone at query time reads as external until
        // proven ours.
        if let LockState::Owner(holder) = &medium.lock {
            info!("Medium '{id}' is locked ({holder})");
            medium.lock = LockState::External;
        }

        debug!("{id}: free={}", medium.stats.phys_spc_free);
        Ok(medium)
    }

    /// Retrieve device information from the system and complementary info
    /// from the store:
    /// - check store info is consistent with the system view,
    /// - query the library for the drive location and whether it is full,
    /// - for full drives, load the medium record and detect a mounted
    ///   filesystem.
    pub(crate) async fn fill_dev_info(
        &self,
        dev: &mut DeviceDescriptor,
        lib: &LibraryAdapterRef,
    ) -> Result<()> {
        dev.medium = None;
        dev.mount_path = None;

        let deva = self.adapters.device_adapter(dev.info.family)?;

        dev.path = deva.lookup(&dev.info.serial).await.map_err(|e| {
            debug!("Device lookup failed: serial '{}'", dev.info.serial);
            e
        })?;

        dev.sys = deva.query(&dev.path).await.map_err(|e| {
            debug!("Failed to query device '{}'", dev.path.display());
            e
        })?;

        check_dev_info(dev)?;

        dev.slot = lib.drive_lookup(&dev.info.serial).await.map_err(|e| {
            debug!(
                "Failed to query the library about device '{}'",
                dev.info.serial
            );
            e
        })?;

        if !dev.slot.full {
            dev.status = DeviceStatus::Empty;
            debug!("Drive '{}' is '{}'", dev.path.display(), dev.status);
            return Ok(());
        }

        let medium_id = dev.slot.medium.clone().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "library reports '{}' full without a medium id",
                dev.path.display()
            ))
        })?;

        debug!(
            "Device '{}' (S/N '{}') contains medium '{medium_id}'",
            dev.path.display(),
            dev.info.serial
        );

        dev.status = DeviceStatus::Loaded;

        let mut medium = match self.fill_media_info(&medium_id).await {
            Ok(medium) => medium,
            Err(e @ Error::NoSuchMedium(_)) => {
                // The medium in this drive is unknown: unusable drive.
                dev.status = DeviceStatus::Failed;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        // If the drive is locally locked, the contained medium was in fact
        // locked by us when the drive list was refreshed.
        if dev.locked_local && medium.lock.is_external() {
            medium.lock = LockState::Unlocked;
        }

        let fsa = self.adapters.fs_adapter(medium.fs.kind)?;
        dev.medium = Some(medium);

        if let Some(mnt_path) = fsa.mounted(&dev.path).await? {
            debug!("Discovered mounted filesystem at '{}'", mnt_path.display());
            dev.mount_path = Some(mnt_path);
            dev.status = DeviceStatus::Mounted;
        }

        debug!("Drive '{}' is '{}'", dev.path.display(), dev.status);
        Ok(())
    }

    /// Bring the cache in sync with the store, the library and the system.
    ///
    /// The first call populates the cache from a filtered store query;
    /// subsequent calls refresh the existing entries in place.
    pub(crate) async fn load_dev_state(&self, cache: &mut DeviceCache) -> Result<()> {
        let family = self.config.default_family;

        if cache.is_empty() {
            let host = owner::host_short_name()?;
            let rows = self
                .dss
                .device_get(&filter::usable_devices(&host, family))
                .await?;

            if rows.is_empty() {
                info!("No usable device found ({family}): check device status");
                return Err(Error::NoUsableDevice(family.to_string()));
            }

            cache.devices = rows.into_iter().map(DeviceDescriptor::new).collect();
        }

        let lib = self.adapters.library_adapter(family)?;

        for dev in &mut cache.devices {
            if let Err(e) = self.fill_dev_info(dev, &lib).await {
                debug!(
                    "Marking device '{}' as failed: {e}",
                    dev.path.display()
                );
                dev.status = DeviceStatus::Failed;
            }
        }

        Ok(())
    }

    /// Append a new drive to the cache and refresh it.
    pub async fn device_add(&self, info: crate::domain::device::DeviceInfo) -> Result<()> {
        info!("Adding device '{}' to the scheduler", info.serial);

        let lib = self.adapters.library_adapter(info.family)?;
        let mut dev = DeviceDescriptor::new(info);
        self.fill_dev_info(&mut dev, &lib).await?;

        let mut cache = self.cache.lock().await;
        cache.devices.push(dev);
        Ok(())
    }
}
