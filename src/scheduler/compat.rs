//! Drive/Medium Compatibility Oracle
//!
//! Decides whether a drive can read and write a given medium, backed by
//! two configuration tables: medium model -> compatible drive types, and
//! drive type -> concrete drive model strings. Families without a model
//! notion (directories) are compatible with any drive of the family.

use crate::config::SchedulerConfig;
use crate::domain::device::FamilyKind;
use crate::domain::media::MediumInfo;
use crate::error::{Error, Result};
use indexmap::IndexMap;

// =============================================================================
// Compatibility Matrix
// =============================================================================

/// Compatibility tables, resolved once from configuration.
#[derive(Debug, Clone, Default)]
pub struct CompatMatrix {
    /// Tape model -> compatible drive type names, in configured order
    tape_drive_rw: IndexMap<String, Vec<String>>,
    /// Drive type name -> member drive model strings
    drive_models: IndexMap<String, Vec<String>>,
}

impl CompatMatrix {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            tape_drive_rw: config
                .tape_type
                .iter()
                .map(|(model, section)| (model.clone(), section.drive_rw.clone()))
                .collect(),
            drive_models: config
                .drive_type
                .iter()
                .map(|(name, section)| (name.clone(), section.models.clone()))
                .collect(),
        }
    }

    /// Drive types able to read/write the given tape model.
    fn rw_drive_types(&self, tape_model: &str) -> Result<&[String]> {
        self.tape_drive_rw
            .get(tape_model)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "no drive_rw entry for tape model '{tape_model}'"
                ))
            })
    }

    /// Drive models belonging to the given drive type.
    fn models_of(&self, drive_type: &str) -> Result<&[String]> {
        self.drive_models
            .get(drive_type)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                Error::Configuration(format!("no models entry for drive type '{drive_type}'"))
            })
    }

    /// Can `drive_model` read and write `medium`?
    ///
    /// A drive is compatible iff its model appears in the model list of any
    /// drive type compatible with the medium model.
    pub fn compatible(&self, medium: &MediumInfo, drive_model: Option<&str>) -> Result<bool> {
        if medium.id.family != FamilyKind::Tape {
            return Ok(true);
        }

        let tape_model = medium.model.as_deref().ok_or_else(|| {
            Error::Configuration(format!("tape medium '{}' has no model", medium.id))
        })?;

        let drive_model = match drive_model {
            Some(m) => m,
            None => return Ok(false),
        };

        for drive_type in self.rw_drive_types(tape_model)? {
            if self
                .models_of(drive_type)?
                .iter()
                .any(|m| m == drive_model)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
