//! 端点寄存器布局和操作

use bitflags::bitflags;
use pciep_core::field::ready;
use pciep_core::{DmaDirection, RegisterIo};

/// 寄存器块大小
pub const PCIEP_REG_SPACE: usize = 0x80;

// ============ 端点侧缓冲区握手寄存器 ============

/// 读缓冲区就绪 (bit0 就绪, bits[16:32) 偏移高位)
pub const PCIEP_READ_BUFFER_READY: usize = 0x00;
/// 读缓冲区设备可见地址
pub const PCIEP_READ_BUFFER_ADDR: usize = 0x04;
/// 读缓冲区字节偏移
pub const PCIEP_READ_BUFFER_OFFSET: usize = 0x08;
/// 读缓冲区字节数
pub const PCIEP_READ_BUFFER_SIZE: usize = 0x0c;
/// 写缓冲区就绪
pub const PCIEP_WRITE_BUFFER_READY: usize = 0x10;
/// 写缓冲区设备可见地址
pub const PCIEP_WRITE_BUFFER_ADDR: usize = 0x14;
/// 写缓冲区字节偏移
pub const PCIEP_WRITE_BUFFER_OFFSET: usize = 0x18;
/// 写缓冲区字节数
pub const PCIEP_WRITE_BUFFER_SIZE: usize = 0x1c;
/// 读传输完成标志
pub const PCIEP_READ_TRANSFER_DONE: usize = 0x20;
/// 写传输完成标志
pub const PCIEP_WRITE_TRANSFER_DONE: usize = 0x24;
pub const PCIEP_READ_TRANSFER_CLR: usize = 0x28;
pub const PCIEP_READ_BUFFER_HOST_INTR: usize = 0x2c;
pub const PCIEP_WRITE_TRANSFER_CLR: usize = 0x30;

// ============ 根复合体侧寄存器 ============

/// 文件长度高 32 位
pub const PCIRC_READ_FILE_LENGTH_HIGH: usize = 0x3c;
/// 文件长度低 32 位
pub const PCIRC_READ_FILE_LENGTH: usize = 0x40;
pub const PCIRC_READ_BUFFER_TRANSFER_DONE: usize = 0x44;
pub const PCIRC_WRITE_BUFFER_TRANSFER_DONE: usize = 0x48;
/// 编码参数 1
pub const PCIRC_ENC_PARAMS_1: usize = 0x4c;
/// 编码参数 2
pub const PCIRC_ENC_PARAMS_2: usize = 0x50;
/// 原始分辨率
pub const PCIRC_RAW_RESOLUTION: usize = 0x54;
/// 用例模式/格式/帧率
pub const PCIRC_USECASE_MODE: usize = 0x58;
/// 编码参数 3
pub const PCIRC_ENC_PARAMS_3: usize = 0x5c;
/// 编码参数 4
pub const PCIRC_ENC_PARAMS_4: usize = 0x60;
/// 编码参数 5
pub const PCIRC_ENC_PARAMS_5: usize = 0x64;
/// 读完成中断确认 (读清)
pub const PCIRC_READ_BUFFER_TRANSFER_DONE_INTR: usize = 0x68;
/// 写完成中断确认 (读清)
pub const PCIRC_WRITE_BUFFER_TRANSFER_DONE_INTR: usize = 0x6c;
/// 主机完成中断确认 (读清)
pub const PCIRC_HOST_DONE_INTR: usize = 0x70;

/// 编码参数寄存器，按参数编号顺序
pub const PCIRC_ENC_PARAMS: [usize; 5] = [
    PCIRC_ENC_PARAMS_1,
    PCIRC_ENC_PARAMS_2,
    PCIRC_ENC_PARAMS_3,
    PCIRC_ENC_PARAMS_4,
    PCIRC_ENC_PARAMS_5,
];

/// 清零值
pub const PCIEP_CLR_REG: u32 = 0x0;
/// 置位传输完成标志时写入的值
pub const TRANSFER_DONE_MAGIC: u32 = 0xef;

bitflags! {
    /// 缓冲区就绪寄存器
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReadyReg: u32 {
        /// 缓冲区已交给设备
        const READY = 1 << 0;
        /// 字节偏移的高 16 位
        const OFFSET_HIGH = 0xFFFF_0000;
    }
}

/// 单个方向的一组寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRegs {
    pub ready: usize,
    pub addr: usize,
    pub offset: usize,
    pub size: usize,
    pub done: usize,
    /// 完成中断确认寄存器
    pub done_intr: usize,
}

impl ChannelRegs {
    /// 设备到主机 (read 路径)
    pub const READ: Self = Self {
        ready: PCIEP_READ_BUFFER_READY,
        addr: PCIEP_READ_BUFFER_ADDR,
        offset: PCIEP_READ_BUFFER_OFFSET,
        size: PCIEP_READ_BUFFER_SIZE,
        done: PCIEP_READ_TRANSFER_DONE,
        done_intr: PCIRC_READ_BUFFER_TRANSFER_DONE_INTR,
    };

    /// 主机到设备 (write 路径)
    pub const WRITE: Self = Self {
        ready: PCIEP_WRITE_BUFFER_READY,
        addr: PCIEP_WRITE_BUFFER_ADDR,
        offset: PCIEP_WRITE_BUFFER_OFFSET,
        size: PCIEP_WRITE_BUFFER_SIZE,
        done: PCIEP_WRITE_TRANSFER_DONE,
        done_intr: PCIRC_WRITE_BUFFER_TRANSFER_DONE_INTR,
    };

    pub const fn for_direction(direction: DmaDirection) -> Self {
        match direction {
            DmaDirection::DeviceToHost => Self::READ,
            DmaDirection::HostToDevice => Self::WRITE,
        }
    }

    /// 读取就绪寄存器
    pub fn ready_reg<R: RegisterIo>(&self, regs: &R) -> ReadyReg {
        ReadyReg::from_bits_retain(regs.read(self.ready))
    }

    /// 交出缓冲区: 先写地址和字节数，最后置就绪位
    pub fn announce<R: RegisterIo>(&self, regs: &R, bus_addr: u32, count: u32) {
        regs.write(self.addr, bus_addr);
        regs.write(self.size, count);
        let value = self.ready_reg(regs) | ReadyReg::READY;
        regs.write(self.ready, value.bits());
    }

    /// 清除就绪位，保留偏移高位
    pub fn clear_ready<R: RegisterIo>(&self, regs: &R) {
        let value = self.ready_reg(regs) - ReadyReg::READY;
        regs.write(self.ready, value.bits());
    }

    /// 设置字节偏移: 低字寄存器写全 32 位，高 16 位同时装入就绪寄存器
    pub fn set_offset<R: RegisterIo>(&self, regs: &R, offset: u64) {
        regs.write(self.offset, offset as u32);
        let value = ready::pack_offset_high(regs.read(self.ready), offset);
        regs.write(self.ready, value);
    }

    /// 清除字节偏移及就绪寄存器中的高位
    pub fn clear_offset<R: RegisterIo>(&self, regs: &R) {
        regs.write(self.offset, PCIEP_CLR_REG);
        let value = self.ready_reg(regs) - ReadyReg::OFFSET_HIGH;
        regs.write(self.ready, value.bits());
    }

    /// 置位/清除传输完成标志
    pub fn set_done<R: RegisterIo>(&self, regs: &R, done: bool) {
        let value = if done { TRANSFER_DONE_MAGIC } else { PCIEP_CLR_REG };
        regs.write(self.done, value);
    }

    /// 清零本方向的就绪、完成、偏移、字节数寄存器
    pub fn reset<R: RegisterIo>(&self, regs: &R) {
        regs.write(self.done, PCIEP_CLR_REG);
        regs.write(self.offset, PCIEP_CLR_REG);
        regs.write(self.size, PCIEP_CLR_REG);
        regs.write(self.ready, PCIEP_CLR_REG);
    }
}
