//! Device Picker
//!
//! Selects one device from the cache by operational status, tags and
//! medium compatibility, ranks candidates with a pluggable policy, then
//! acquires the medium lock (if any) followed by the device lock. Lock
//! acquisition failures are remembered per call and the scan restarts,
//! until a device is reserved or every candidate has failed.

use crate::config::WritePolicy;
use crate::domain::media::{FsStatus, LockState, MediumInfo, Tags};
use crate::error::Result;
use crate::scheduler::cache::DeviceCache;
use crate::scheduler::device::{DeviceDescriptor, DeviceStatus};
use crate::scheduler::Scheduler;
use tracing::{debug, warn};

// =============================================================================
// Ranking Policies
// =============================================================================

/// Ranking policy applied over acceptable devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickPolicy {
    /// First device whose loaded medium has enough free space
    FirstFit,
    /// Device whose loaded medium has the least sufficient free space;
    /// an exact match stops the search
    BestFit,
    /// First acceptable device
    Any,
    /// Loaded or mounted device with the least free space, to empty it
    DriveToFree,
}

impl From<WritePolicy> for PickPolicy {
    fn from(policy: WritePolicy) -> Self {
        match policy {
            WritePolicy::BestFit => PickPolicy::BestFit,
            WritePolicy::FirstFit => PickPolicy::FirstFit,
        }
    }
}

/// Outcome of ranking one candidate.
enum Verdict {
    /// Take this device and stop searching
    Select,
    /// Take this device, keep looking for a better one
    Prefer,
    /// Leave this device alone
    Skip,
}

impl PickPolicy {
    fn consider(
        &self,
        required_size: u64,
        dev: &DeviceDescriptor,
        best: Option<&DeviceDescriptor>,
    ) -> Verdict {
        match self {
            PickPolicy::FirstFit => match dev.medium_free() {
                Some(free) if free >= required_size => Verdict::Select,
                _ => Verdict::Skip,
            },

            PickPolicy::BestFit => {
                let Some(free) = dev.medium_free() else {
                    return Verdict::Skip;
                };
                if free < required_size {
                    return Verdict::Skip;
                }
                let improves = match best.and_then(DeviceDescriptor::medium_free) {
                    Some(best_free) => free < best_free,
                    None => true,
                };
                if !improves {
                    Verdict::Skip
                } else if free == required_size {
                    Verdict::Select
                } else {
                    Verdict::Prefer
                }
            }

            PickPolicy::Any => {
                if best.is_none() {
                    Verdict::Select
                } else {
                    Verdict::Skip
                }
            }

            PickPolicy::DriveToFree => {
                if dev.status == DeviceStatus::Failed {
                    debug!(
                        "Skipping drive '{}' with status {}",
                        dev.path.display(),
                        dev.status
                    );
                    return Verdict::Skip;
                }
                if dev.status == DeviceStatus::Empty {
                    warn!(
                        "Unexpected drive status for '{}': '{}'",
                        dev.path.display(),
                        dev.status
                    );
                    return Verdict::Skip;
                }
                let Some(free) = dev.medium_free() else {
                    return Verdict::Skip;
                };
                match best.and_then(DeviceDescriptor::medium_free) {
                    Some(best_free) if free >= best_free => Verdict::Skip,
                    _ => Verdict::Prefer,
                }
            }
        }
    }
}

// =============================================================================
// Picking Loop
// =============================================================================

impl Scheduler {
    /// Select a device according to a status filter and ranking policy.
    ///
    /// Returns the index of a device reserved under this instance's locks:
    /// the contained medium is locked first, then the device. `None` means
    /// no suitable device exists right now.
    pub(crate) async fn pick_device(
        &self,
        cache: &mut DeviceCache,
        status_filter: Option<DeviceStatus>,
        policy: PickPolicy,
        required_size: u64,
        media_tags: &Tags,
        medium: Option<&MediumInfo>,
    ) -> Result<Option<usize>> {
        let mut failed = vec![false; cache.devices.len()];

        'retry: loop {
            let mut best: Option<usize> = None;

            for i in 0..cache.devices.len() {
                // Already unsuccessfully tried to acquire this device
                if failed[i] {
                    continue;
                }

                let dev = &cache.devices[i];

                if !dev.is_available() {
                    debug!("Skipping locked or busy device '{}'", dev.path.display());
                    continue;
                }

                if let Some(wanted) = status_filter {
                    if dev.status != wanted {
                        debug!(
                            "Skipping device '{}' with incompatible status {}",
                            dev.path.display(),
                            dev.status
                        );
                        continue;
                    }
                }

                // The intent is to write: exclude media that are full or do
                // not have the requested tags.
                if required_size > 0 {
                    if let Some(m) = &dev.medium {
                        if m.fs.status == FsStatus::Full {
                            debug!("Medium '{}' is full", m.id);
                            continue;
                        }
                        if !m.tags.contains_all(media_tags) {
                            debug!("Medium '{}' does not match required tags", m.id);
                            continue;
                        }
                    }
                }

                if let Some(target) = medium {
                    match self.compat.compatible(target, dev.info.model.as_deref()) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            warn!("Device selection failed on compatibility check: {e}");
                            break 'retry Ok(None);
                        }
                    }
                }

                let best_ref = best.map(|b| &cache.devices[b]);
                match policy.consider(required_size, dev, best_ref) {
                    Verdict::Select => {
                        best = Some(i);
                        break;
                    }
                    Verdict::Prefer => best = Some(i),
                    Verdict::Skip => {}
                }
            }

            let Some(idx) = best else {
                debug!("Could not find a suitable device");
                break 'retry Ok(None);
            };

            debug!(
                "Picked device {idx} ('{}')",
                cache.devices[idx].path.display()
            );

            // Medium first, then device.
            let mut media_acquired = false;
            let mut acquired = true;

            let status = cache.devices[idx].status;
            if let Some(m) = cache.devices[idx].medium.as_mut() {
                debug!("Acquiring {status} medium '{}'", m.id);
                match self.media_acquire(m).await {
                    Ok(()) => media_acquired = true,
                    Err(_) => acquired = false,
                }
            }

            if acquired {
                match self.dev_acquire(&mut cache.devices[idx]).await {
                    Ok(()) => break 'retry Ok(Some(idx)),
                    Err(_) => {
                        if media_acquired {
                            let dev = &mut cache.devices[idx];
                            if let Some(id) = dev.medium.as_ref().map(|m| m.id.clone()) {
                                let _ = self.media_release(&id).await;
                            }
                            if let Some(m) = dev.medium.as_mut() {
                                m.lock = LockState::Unlocked;
                            }
                        }
                    }
                }
            }

            // Locally mark this device as failed and resume the scan.
            failed[idx] = true;
        }
    }

    /// True if at least one non-failed drive could take `medium`.
    pub(crate) fn compatible_drive_exists(
        &self,
        cache: &DeviceCache,
        medium: &MediumInfo,
    ) -> bool {
        cache.devices.iter().any(|dev| {
            dev.status != DeviceStatus::Failed
                && self
                    .compat
                    .compatible(medium, dev.info.model.as_deref())
                    .unwrap_or(false)
        })
    }
}
