//! Coldstore Scheduler - Host-Local Media Resource Scheduler
//!
//! Arbitrates access to one host's physical media resources (tape drives,
//! cartridges held in a robotic library, on-disk directories) on behalf of
//! a tape/directory object store. Store operations obtain a mounted,
//! locked (drive, medium) pair through the scheduler and hand it back when
//! their I/O completes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Scheduler                            │
//! │  write_prepare / read_prepare / format / io_complete /       │
//! │  resource_release / locate                                   │
//! ├──────────────┬──────────────┬──────────────┬────────────────┤
//! │ Device Cache │    Medium    │    Device    │  Media Motion  │
//! │   (refresh)  │   Selector   │    Picker    │ (load / mount) │
//! ├──────────────┴──────────────┴──────────────┴────────────────┤
//! │           Metadata Store (rows + shared lock registry)      │
//! │     Device / Library / Filesystem / IO adapter ports        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`scheduler`]: the scheduler, its device cache and policies
//! - [`domain`]: row types, filters and adapter ports
//! - [`config`]: settings and compatibility tables
//! - [`error`]: error types and POSIX code mapping

pub mod config;
pub mod domain;
pub mod error;
pub mod scheduler;

#[cfg(test)]
pub mod testing;

// Re-export commonly used types
pub use config::{SchedulerConfig, WritePolicy};
pub use domain::{
    AdapterRegistry, AdminStatus, DeviceInfo, FamilyKind, FsDescriptor, FsStatus, FsType,
    LockState, MediaStats, MediumId, MediumInfo, Tags,
};
pub use error::{Error, Result};
pub use scheduler::device::DeviceStatus;
pub use scheduler::intent::Intent;
pub use scheduler::{MediaOp, ObjectKey, Scheduler};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
