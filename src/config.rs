//! Scheduler Configuration
//!
//! Settings controlling medium/drive selection and mounting, plus the
//! drive/medium compatibility tables. Everything deserializes from the
//! host configuration file; defaults suit a single-library tape host.

use crate::domain::device::FamilyKind;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// =============================================================================
// Write Policy
// =============================================================================

/// Ranking applied when choosing among resident media for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Tightest fit: the medium whose free space exceeds the request by
    /// the least wins
    BestFit,
    /// First medium with enough free space wins
    FirstFit,
}

impl Default for WritePolicy {
    fn default() -> Self {
        WritePolicy::BestFit
    }
}

// =============================================================================
// Compatibility Tables
// =============================================================================

/// One drive type: a name grouping the concrete drive models of a
/// generation (e.g. "LTO6_drive" -> ULTRIUM-TD6, ULT3580-TD6, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriveTypeSection {
    /// Drive model strings as reported by the drives themselves
    pub models: Vec<String>,
}

/// One tape model: the drive types able to read and write it, in
/// preference order (e.g. "LTO5" -> LTO5_drive, LTO6_drive).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TapeTypeSection {
    /// Compatible drive type names, ordered
    pub drive_rw: Vec<String>,
}

// =============================================================================
// Scheduler Configuration
// =============================================================================

/// Configuration for one scheduler instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Path prefix for mount points; the device basename is appended
    #[serde(default = "default_mount_prefix")]
    pub mount_prefix: String,

    /// Family served by this instance
    #[serde(default = "default_family")]
    pub default_family: FamilyKind,

    /// Control device of the robotic library
    #[serde(default = "default_lib_device")]
    pub lib_device: String,

    /// Medium ranking policy for writes
    #[serde(default)]
    pub policy: WritePolicy,

    /// Drive type name -> member models. Order is the configured order.
    #[serde(default)]
    pub drive_type: IndexMap<String, DriveTypeSection>,

    /// Tape model -> compatible drive types, in preference order.
    #[serde(default)]
    pub tape_type: IndexMap<String, TapeTypeSection>,
}

fn default_mount_prefix() -> String {
    "/mnt/coldstore-".to_string()
}

fn default_family() -> FamilyKind {
    FamilyKind::Tape
}

fn default_lib_device() -> String {
    "/dev/changer".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mount_prefix: default_mount_prefix(),
            default_family: default_family(),
            lib_device: default_lib_device(),
            policy: WritePolicy::default(),
            drive_type: IndexMap::new(),
            tape_type: IndexMap::new(),
        }
    }
}
