//! Error types for the media scheduler
//!
//! Provides structured error types for all scheduler components including
//! the device cache, medium selection, lock management and media motion.
//! At the scheduler boundary every error maps to a negative POSIX code.

use thiserror::Error;

/// Unified error type for the scheduler
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Input / Configuration Errors
    // =========================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Device '{path}' does not match its registered description: {reason}")]
    DeviceMismatch { path: String, reason: String },

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    #[error("No medium found matching '{0}'")]
    NoSuchMedium(String),

    #[error("Ambiguous medium id '{0}': several rows match")]
    AmbiguousMedium(String),

    #[error("No object found matching '{0}'")]
    NoSuchObject(String),

    #[error("Ambiguous object reference '{0}': several objects match")]
    AmbiguousObject(String),

    // =========================================================================
    // Resource Exhaustion
    // =========================================================================
    #[error("No medium with {required} free bytes is available")]
    NoSpace { required: u64 },

    #[error("No compatible device: {0}")]
    NoDevice(String),

    #[error("No usable device of family '{0}' on this host")]
    NoUsableDevice(String),

    // =========================================================================
    // Contention
    // =========================================================================
    /// Transient contention: another instance holds a lock, or the world
    /// changed between scan and pick. Callers retry the whole request.
    #[error("Resource busy, retry later: {0}")]
    Retry(String),

    /// The library refused a motion that was legal when planned. Internal
    /// only: surfaced to clients as [`Error::Retry`].
    #[error("Library motion rejected: {0}")]
    Busy(String),

    // =========================================================================
    // External Collaborators
    // =========================================================================
    #[error("Metadata store error: {0}")]
    Store(String),

    #[error("Adapter error on '{device}': {reason}")]
    Adapter { device: String, reason: String },

    #[error("No adapter registered for '{0}'")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Negative POSIX code reported at the scheduler boundary.
    pub fn errno(&self) -> i32 {
        match self {
            Error::InvalidArgument(_)
            | Error::Configuration(_)
            | Error::DeviceMismatch { .. }
            | Error::AmbiguousMedium(_)
            | Error::AmbiguousObject(_)
            | Error::Json(_) => -libc_errno::EINVAL,

            Error::NoSuchMedium(_) | Error::NoUsableDevice(_) => -libc_errno::ENXIO,
            Error::NoSuchObject(_) => -libc_errno::ENOENT,
            Error::NoSpace { .. } => -libc_errno::ENOSPC,
            Error::NoDevice(_) => -libc_errno::ENODEV,
            Error::Retry(_) => -libc_errno::EAGAIN,
            Error::Busy(_) => -libc_errno::EBUSY,
            Error::Unsupported(_) => -libc_errno::ENOTSUP,
            Error::Store(_) | Error::Adapter { .. } => -libc_errno::EIO,
            Error::Io(e) => -e.raw_os_error().unwrap_or(libc_errno::EIO),
        }
    }

    /// Check if retrying the whole request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Retry(_) | Error::Busy(_))
    }

    /// True when a reported code condemns the whole medium, not just one
    /// extent, so the medium must be marked full.
    pub fn code_is_media_global(err_code: i32) -> bool {
        matches!(
            -err_code,
            libc_errno::ENOSPC | libc_errno::EDQUOT | libc_errno::EROFS | libc_errno::EIO
        )
    }
}

/// Result type alias for the scheduler
pub type Result<T> = std::result::Result<T, Error>;

/// POSIX codes used at the boundary. Values are the Linux ones; the crate
/// never round-trips them through the platform libc.
pub(crate) mod libc_errno {
    pub const EINVAL: i32 = 22;
    pub const ENXIO: i32 = 6;
    pub const ENOENT: i32 = 2;
    pub const ENOSPC: i32 = 28;
    pub const ENODEV: i32 = 19;
    pub const EAGAIN: i32 = 11;
    pub const EBUSY: i32 = 16;
    pub const ENOTSUP: i32 = 95;
    pub const EIO: i32 = 5;
    pub const EDQUOT: i32 = 122;
    pub const EROFS: i32 = 30;
}
