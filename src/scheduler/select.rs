//! Medium Selector
//!
//! Chooses a medium for a write: queries the store for candidates matching
//! family, size, tags, formatting and admin status, then takes the tightest
//! fit that is not known to be externally locked. Losing the lock race
//! marks the candidate external in memory and re-ranks within the same
//! query result.

use crate::domain::device::FamilyKind;
use crate::domain::filter;
use crate::domain::media::{MediumInfo, Tags};
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use tracing::{debug, info};

impl Scheduler {
    /// Get a suitable medium for a write operation, with its store lock
    /// held by this instance.
    pub(crate) async fn select_media(
        &self,
        required_size: u64,
        family: FamilyKind,
        tags: &Tags,
    ) -> Result<MediumInfo> {
        let query = filter::write_candidates(family, required_size, tags);
        let mut candidates = self.dss.media_get(&query).await?;

        loop {
            let mut best: Option<usize> = None;
            let mut fitting_exists = false;

            for (i, medium) in candidates.iter().enumerate() {
                if medium.stats.phys_spc_free < required_size {
                    continue;
                }

                // Remember that at least one fitting medium exists, locked
                // or not: it decides retry-possible vs no-space below.
                fitting_exists = true;

                if medium.lock.is_external() {
                    continue;
                }

                let improves = match best {
                    Some(b) => {
                        medium.stats.phys_spc_free < candidates[b].stats.phys_spc_free
                    }
                    None => true,
                };
                if improves {
                    best = Some(i);
                }
            }

            let Some(idx) = best else {
                info!("No compatible medium found to write {required_size} bytes");
                if fitting_exists {
                    return Err(Error::Retry(format!(
                        "every medium fitting {required_size} bytes is locked"
                    )));
                }
                return Err(Error::NoSpace {
                    required: required_size,
                });
            };

            debug!("Acquiring selected medium '{}'", candidates[idx].id);
            if self.media_acquire(&mut candidates[idx]).await.is_err() {
                // Lost the race: the acquire marked it external, re-rank.
                debug!(
                    "Failed to lock medium '{}', looking for another one",
                    candidates[idx].id
                );
                continue;
            }

            let selected = candidates[idx].clone();
            info!(
                "Selected {family} '{}': {} bytes free",
                selected.id, selected.stats.phys_spc_free
            );
            return Ok(selected);
        }
    }
}
