//! PCIe endpoint 传输驱动的设备层和文件层

#[macro_use]
extern crate log;

pub mod file;
pub mod vfs;
