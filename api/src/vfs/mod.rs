pub mod dev;

pub use pciep_core::vfs::DeviceOps;
