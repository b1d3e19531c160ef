//! PCIe endpoint 寄存器协议核心
//!
//! 与具体设备无关的底层组件：寄存器访问、位域编解码、DMA 缓冲区管理、
//! 完成量以及进程级的设备注册表。

#[macro_use]
extern crate log;

pub mod completion;
pub mod dma;
pub mod error;
pub mod field;
pub mod regs;
pub mod registry;
pub mod vfs;

pub use completion::Completion;
pub use dma::{DmaAllocator, DmaBuffer, DmaBufferManager, DmaDirection, DmaInfo, HostDmaAllocator};
pub use error::{PciepError, PciepResult};
pub use regs::{MmioRegs, RegisterIo, ShadowRegisters};
