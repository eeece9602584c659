//! Media Motion
//!
//! Transitions one device among `empty`, `loaded` and `mounted` by driving
//! the library and filesystem adapters, plus the drive-freeing planner
//! that empties a sacrificial drive to make room for a new medium.
//!
//! | From    | Op     | Post                           |
//! |---------|--------|--------------------------------|
//! | empty   | load   | loaded                         |
//! | loaded  | mount  | mounted                        |
//! | mounted | umount | loaded                         |
//! | loaded  | unload | empty, medium lock released    |
//!
//! Adapter failures in a transition mark the device `failed`; a library
//! refusing a drive-to-drive move is `Busy` and preserves the state.

use crate::domain::media::{MediumInfo, Tags};
use crate::domain::ports::{LibAddress, LibElement};
use crate::error::{Error, Result};
use crate::scheduler::cache::DeviceCache;
use crate::scheduler::device::{DeviceDescriptor, DeviceStatus};
use crate::scheduler::picker::PickPolicy;
use crate::scheduler::Scheduler;
use chrono::Utc;
use tracing::{debug, info, warn};

impl Scheduler {
    // =========================================================================
    // Load / Unload
    // =========================================================================

    /// Load a medium into an empty drive.
    ///
    /// `Busy` is returned when a drive-to-drive movement was refused by the
    /// library; the drive state is preserved so the caller can retry later.
    pub(crate) async fn load(
        &self,
        dev: &mut DeviceDescriptor,
        mut medium: MediumInfo,
    ) -> Result<()> {
        if dev.status != DeviceStatus::Empty {
            return Err(Error::Retry(format!(
                "{}: unexpected drive status '{}'",
                dev.path.display(),
                dev.status
            )));
        }

        if let Some(loaded) = &dev.medium {
            return Err(Error::Retry(format!(
                "no medium expected in device '{}' (found '{}')",
                dev.path.display(),
                loaded.id
            )));
        }

        info!("Loading '{}' into '{}'", medium.id, dev.path.display());

        let lib = self.adapters.library_adapter(dev.info.family)?;

        let media_addr = lib.media_lookup(&medium.id.label).await.map_err(|e| {
            debug!("Medium lookup failed: {e}");
            e
        })?;

        match lib.media_move(&media_addr, &dev.slot.address).await {
            Ok(()) => {}
            // A movement from drive to drive can be prohibited by some
            // libraries. Encountering it means the library state changed
            // between the scan and the pick.
            Err(Error::InvalidArgument(_))
                if media_addr.kind == LibElement::Drive
                    && dev.slot.address.kind == LibElement::Drive =>
            {
                debug!("Failed to move a medium from one drive to another, trying again later");
                return Err(Error::Busy(format!(
                    "drive-to-drive move of '{}' refused",
                    medium.id
                )));
            }
            Err(e) => {
                dev.status = DeviceStatus::Failed;
                warn!("Medium move failed: {e}");
                return Err(e);
            }
        }

        medium.stats.nb_load += 1;
        medium.stats.last_load = Some(Utc::now());

        dev.status = DeviceStatus::Loaded;
        dev.slot.full = true;
        dev.slot.medium = Some(medium.id.clone());
        dev.medium = Some(medium);
        Ok(())
    }

    /// Unload the medium from a loaded drive and release its lock
    /// (acquired by the caller, by convention).
    pub(crate) async fn unload(&self, dev: &mut DeviceDescriptor) -> Result<()> {
        if dev.status != DeviceStatus::Loaded {
            return Err(Error::InvalidArgument(format!(
                "unexpected drive status for '{}': '{}'",
                dev.path.display(),
                dev.status
            )));
        }

        let Some(medium) = dev.medium.take() else {
            return Err(Error::InvalidArgument(format!(
                "no medium in loaded device '{}'",
                dev.path.display()
            )));
        };

        info!("Unloading '{}' from '{}'", medium.id, dev.path.display());

        let lib = self.adapters.library_adapter(dev.info.family)?;

        // Let the library choose the target slot.
        if let Err(e) = lib
            .media_move(&dev.slot.address, &LibAddress::UNKNOWN)
            .await
        {
            dev.medium = Some(medium);
            dev.status = DeviceStatus::Failed;
            warn!("Medium move failed: {e}");
            return Err(e);
        }

        dev.status = DeviceStatus::Empty;
        dev.slot.full = false;
        dev.slot.medium = None;

        if let Err(e) = self.media_release(&medium.id).await {
            warn!("Failed to release lock on '{}': {e}", medium.id);
        }
        Ok(())
    }

    // =========================================================================
    // Mount / Umount
    // =========================================================================

    /// Mount the filesystem of a loaded device.
    pub(crate) async fn mount(&self, dev: &mut DeviceDescriptor) -> Result<()> {
        match self.try_mount(dev).await {
            Ok(()) => Ok(()),
            Err(e) => {
                dev.status = DeviceStatus::Failed;
                Err(e)
            }
        }
    }

    async fn try_mount(&self, dev: &mut DeviceDescriptor) -> Result<()> {
        let medium = dev.medium.as_ref().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "no medium in device '{}' to mount",
                dev.path.display()
            ))
        })?;

        let fsa = self.adapters.fs_adapter(medium.fs.kind)?;

        // A pre-existing mount is reused.
        if let Ok(Some(mnt_path)) = fsa.mounted(&dev.path).await {
            dev.mount_path = Some(mnt_path);
            dev.status = DeviceStatus::Mounted;
            return Ok(());
        }

        let id = dev
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "cannot derive a mount id from '{}'",
                    dev.path.display()
                ))
            })?;

        let mnt_root = std::path::PathBuf::from(format!("{}{id}", self.config.mount_prefix));

        info!(
            "Mounting device '{}' as '{}'",
            dev.path.display(),
            mnt_root.display()
        );

        fsa.mount(&dev.path, &mnt_root, &medium.fs.label)
            .await
            .map_err(|e| {
                warn!("Failed to mount device '{}': {e}", dev.path.display());
                e
            })?;

        dev.status = DeviceStatus::Mounted;
        dev.mount_path = Some(mnt_root);
        Ok(())
    }

    /// Unmount the filesystem of a mounted device.
    pub(crate) async fn umount(&self, dev: &mut DeviceDescriptor) -> Result<()> {
        match self.try_umount(dev).await {
            Ok(()) => Ok(()),
            Err(e) => {
                dev.status = DeviceStatus::Failed;
                Err(e)
            }
        }
    }

    async fn try_umount(&self, dev: &mut DeviceDescriptor) -> Result<()> {
        if dev.status != DeviceStatus::Mounted {
            return Err(Error::InvalidArgument(format!(
                "unexpected drive status for '{}': '{}'",
                dev.path.display(),
                dev.status
            )));
        }

        let mnt_path = dev.mount_path.clone().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "no mount point for mounted device '{}'",
                dev.path.display()
            ))
        })?;

        let medium = dev.medium.as_ref().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "no medium in mounted device '{}'",
                dev.path.display()
            ))
        })?;

        info!(
            "Unmounting device '{}' mounted as '{}'",
            dev.path.display(),
            mnt_path.display()
        );

        let fsa = self.adapters.fs_adapter(medium.fs.kind)?;
        fsa.umount(&dev.path, &mnt_path).await.map_err(|e| {
            warn!(
                "Failed to umount device '{}' mounted as '{}': {e}",
                dev.path.display(),
                mnt_path.display()
            );
            e
        })?;

        dev.status = DeviceStatus::Loaded;
        dev.mount_path = None;
        Ok(())
    }

    // =========================================================================
    // Drive-Freeing Planner
    // =========================================================================

    /// Free one of the devices to allow loading a new medium.
    ///
    /// On success the returned device is empty and locked. `Retry` when
    /// every candidate is busy right now, `NoDevice` when no non-failed
    /// drive is compatible with `medium` at all.
    pub(crate) async fn free_one_device(
        &self,
        cache: &mut DeviceCache,
        medium: &MediumInfo,
    ) -> Result<usize> {
        loop {
            let picked = self
                .pick_device(
                    cache,
                    None,
                    PickPolicy::DriveToFree,
                    0,
                    &Tags::none(),
                    Some(medium),
                )
                .await?;

            let Some(idx) = picked else {
                if self.compatible_drive_exists(cache, medium) {
                    return Err(Error::Retry("no suitable device to free".into()));
                }
                return Err(Error::NoDevice(
                    "no compatible device exists that is not failed and not locked by admin"
                        .into(),
                ));
            };

            let dev = &mut cache.devices[idx];

            if dev.status == DeviceStatus::Mounted {
                if self.umount(dev).await.is_err() {
                    self.release_device_locks(&mut cache.devices[idx]).await;
                    continue;
                }
            }

            let dev = &mut cache.devices[idx];
            if dev.status == DeviceStatus::Loaded {
                if self.unload(dev).await.is_err() {
                    self.release_device_locks(&mut cache.devices[idx]).await;
                    continue;
                }
            }

            let dev = &cache.devices[idx];
            if dev.status != DeviceStatus::Empty {
                return Err(Error::InvalidArgument(format!(
                    "unexpected device status '{}' for '{}': should be empty",
                    dev.status,
                    dev.path.display()
                )));
            }

            return Ok(idx);
        }
    }
}
