//! Medium Rows
//!
//! Persistent description of a medium (tape cartridge or directory tree):
//! identity, filesystem descriptor, usage statistics, selection tags and
//! the shared lock slot.

use crate::domain::device::{AdminStatus, FamilyKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Medium Identity
// =============================================================================

/// Identity of a medium: its family plus the label written on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediumId {
    pub family: FamilyKind,
    pub label: String,
}

impl MediumId {
    pub fn new(family: FamilyKind, label: impl Into<String>) -> Self {
        Self {
            family,
            label: label.into(),
        }
    }
}

impl std::fmt::Display for MediumId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.family, self.label)
    }
}

// =============================================================================
// Filesystem Descriptor
// =============================================================================

/// Filesystem deployed on a medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    Posix,
    Ltfs,
}

impl std::fmt::Display for FsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsType::Posix => write!(f, "posix"),
            FsType::Ltfs => write!(f, "ltfs"),
        }
    }
}

/// Life stage of the filesystem on a medium.
///
/// `Blank` media must be formatted before any I/O; `Full` media are
/// never selected for writes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsStatus {
    Blank,
    Empty,
    Used,
    Full,
}

impl std::fmt::Display for FsStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsStatus::Blank => write!(f, "blank"),
            FsStatus::Empty => write!(f, "empty"),
            FsStatus::Used => write!(f, "used"),
            FsStatus::Full => write!(f, "full"),
        }
    }
}

/// Filesystem descriptor stored with each medium row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsDescriptor {
    pub kind: FsType,
    /// Volume label; set equal to the medium label at format time
    #[serde(default)]
    pub label: String,
    pub status: FsStatus,
}

// =============================================================================
// Extent Addressing
// =============================================================================

/// How extents are addressed inside the medium's filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddrType {
    Path,
    Hash,
    Opaque,
}

// =============================================================================
// Usage Statistics
// =============================================================================

/// Usage statistics maintained for each medium.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaStats {
    /// Objects written to this medium
    pub nb_obj: u64,
    /// Logical bytes used (sum of extent sizes)
    pub logc_spc_used: u64,
    /// Physical bytes used, as reported by the filesystem
    pub phys_spc_used: u64,
    /// Physical bytes free, as reported by the filesystem
    pub phys_spc_free: u64,
    /// Times this medium was loaded into a drive
    pub nb_load: u64,
    /// I/O errors observed on this medium
    pub nb_errors: u64,
    /// Last time the medium was loaded
    #[serde(default)]
    pub last_load: Option<DateTime<Utc>>,
}

// =============================================================================
// Lock State
// =============================================================================

/// Local view of a medium's shared lock slot.
///
/// The persisted form is only ever an owner string or empty. `External` is
/// a scheduler-memory marker meaning "held by someone who is not us"; it is
/// never written back to the store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockState {
    #[default]
    Unlocked,
    /// Held, with the owner string as persisted
    Owner(String),
    /// Held by another scheduler instance (local marker only)
    External,
}

impl LockState {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, LockState::Unlocked)
    }

    pub fn is_external(&self) -> bool {
        matches!(self, LockState::External)
    }

    /// Owner string when one is known.
    pub fn owner(&self) -> Option<&str> {
        match self {
            LockState::Owner(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

// =============================================================================
// Selection Tags
// =============================================================================

/// Opaque string labels constraining medium selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags(pub Vec<String>);

impl Tags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tags.into_iter().map(Into::into).collect())
    }

    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every tag of `required` is present in `self`.
    pub fn contains_all(&self, required: &Tags) -> bool {
        required.0.iter().all(|t| self.0.contains(t))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

// =============================================================================
// Medium Row
// =============================================================================

/// A medium as registered in the metadata store, plus the local lock view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediumInfo {
    pub id: MediumId,
    /// Cartridge model (e.g. "LTO6"); absent for directory media
    #[serde(default)]
    pub model: Option<String>,
    pub adm_status: AdminStatus,
    pub fs: FsDescriptor,
    pub addr_type: AddrType,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub stats: MediaStats,
    #[serde(default)]
    pub lock: LockState,
}
