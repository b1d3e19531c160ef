//! PCIe endpoint register-space DMA driver
//!
//! 主机 (root complex) 与 endpoint 之间通过一块 128 字节的寄存器空间交换
//! DMA 缓冲区。每个方向一次只允许一个传输:
//! 分配缓冲区 -> 写地址/字节数 -> 置就绪位 -> 等待完成中断 -> 拷贝 -> 释放。
//!
//! 另有一组控制请求用于查询主机写入的文件长度、编码参数、分辨率和用例模式，
//! 以及设置偏移和传输完成标志。

pub mod control;
pub mod device;
pub mod regs;
pub mod transfer;
pub mod types;

pub use control::ControlPort;
pub use device::{PciepDevice, PciepIrq};
pub use transfer::{TransferChannel, TransferState};
pub use types::*;

/// 驱动名称，也是设备节点和设备类的名字
pub const DRIVER_NAME: &str = "pciep";

/// 次设备号上限
pub const DEVICE_MAX_NUM: u32 = 256;

/// 同时探测的实例上限
pub const MAX_INSTANCES: usize = 4;

/// 设备树兼容字符串
pub const OF_COMPATIBLE: &str = "xlnx,pcie-reg-space-v1-0-1.0";
