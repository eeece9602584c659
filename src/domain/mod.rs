//! Core domain types and ports

pub mod device;
pub mod filter;
pub mod media;
pub mod ports;

pub use device::{AdminStatus, DeviceInfo, FamilyKind};
pub use media::{
    AddrType, FsDescriptor, FsStatus, FsType, LockState, MediaStats, MediumId, MediumInfo, Tags,
};
pub use ports::{
    AdapterRegistry, DeviceAdapter, DriveSlot, FsAdapter, FsSpace, IoAdapter, LibAddress,
    LibElement, LibraryAdapter, MetadataStore, ObjectRecord, SysDeviceState,
};
