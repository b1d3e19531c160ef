//! PCIe endpoint 设备抽象
//!
//! 提供文件操作 (open/release/read/write/seek/ioctl) 和三个中断入口。

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;

use axerrno::AxResult;
use pciep_core::vfs::DeviceOps;
use pciep_core::{
    Completion, DmaAllocator, DmaBufferManager, DmaDirection, MmioRegs, PciepError, PciepResult,
    RegisterIo,
};

use super::control::ControlPort;
use super::regs::*;
use super::transfer::TransferChannel;
use super::types::PciepConfig;

/// 中断源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PciepIrq {
    /// 读缓冲区传输完成
    ReadDone,
    /// 写缓冲区传输完成
    WriteDone,
    /// 主机会话结束
    HostDone,
}

/// PCIe endpoint 设备
pub struct PciepDevice<R: RegisterIo = MmioRegs> {
    /// 寄存器块
    regs: R,
    config: PciepConfig,
    /// DMA 缓冲区管理器
    dma: Arc<DmaBufferManager>,
    /// 设备到主机
    read_chan: TransferChannel,
    /// 主机到设备
    write_chan: TransferChannel,
    /// 会话级完成量，由主机完成中断触发
    session: Completion,
    /// 仅作记录，不限制打开者数量
    is_open: AtomicBool,
}

impl<R: RegisterIo> PciepDevice<R> {
    pub fn new(regs: R, allocator: Arc<dyn DmaAllocator>, config: PciepConfig) -> Self {
        let dma = Arc::new(DmaBufferManager::new(allocator, config.dma_addr_bits));
        Self {
            regs,
            read_chan: TransferChannel::new(DmaDirection::DeviceToHost, config.wait_timeout),
            write_chan: TransferChannel::new(DmaDirection::HostToDevice, config.wait_timeout),
            dma,
            config,
            session: Completion::new(),
            is_open: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PciepConfig {
        &self.config
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn dma(&self) -> &Arc<DmaBufferManager> {
        &self.dma
    }

    pub fn channel(&self, direction: DmaDirection) -> &TransferChannel {
        match direction {
            DmaDirection::DeviceToHost => &self.read_chan,
            DmaDirection::HostToDevice => &self.write_chan,
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    /// 控制寄存器视图
    pub fn control(&self) -> ControlPort<'_, R> {
        ControlPort::new(&self.regs)
    }

    /// 打开会话: 标记打开并复位两个方向
    pub fn open(&self) {
        self.is_open.store(true, Ordering::SeqCst);
        self.session.arm();
        self.reset_all();
        info!("{}{} opened", self.config.name, self.config.minor);
    }

    /// 清零两个方向的就绪/完成/偏移/字节数寄存器
    pub fn reset_all(&self) {
        self.read_chan.reset(&self.regs);
        self.write_chan.reset(&self.regs);
    }

    /// 关闭会话: 清除读偏移 (含高位) 和两个方向的字节数
    pub fn release(&self) {
        self.is_open.store(false, Ordering::SeqCst);
        ChannelRegs::READ.clear_offset(&self.regs);
        self.regs.write(PCIEP_READ_BUFFER_SIZE, PCIEP_CLR_REG);
        self.regs.write(PCIEP_WRITE_BUFFER_SIZE, PCIEP_CLR_REG);
        info!("{}{} released", self.config.name, self.config.minor);
    }

    /// 从设备读取 `count` 字节到 `dst`
    ///
    /// 阻塞直到读完成中断到达。`dst` 短于 `count` 时返回 `CopyFailure`，
    /// 缓冲区照常释放。
    pub fn read(&self, dst: &mut [u8], count: usize) -> PciepResult<usize> {
        debug!("read: count={}", count);
        self.read_chan.transfer(
            &self.regs,
            &self.dma,
            count,
            |_| Ok(()),
            |buf| {
                dst.get_mut(..count)
                    .ok_or(PciepError::CopyFailure)?
                    .copy_from_slice(buf);
                Ok(())
            },
        )
    }

    /// 把 `src` 的前 `count` 字节写给设备
    ///
    /// 阻塞直到写完成中断到达。`src` 短于 `count` 时返回 `CopyFailure`，
    /// 不会写任何寄存器。
    pub fn write(&self, src: &[u8], count: usize) -> PciepResult<usize> {
        debug!("write: count={}", count);
        self.write_chan.transfer(
            &self.regs,
            &self.dma,
            count,
            |buf| {
                buf.copy_from_slice(src.get(..count).ok_or(PciepError::CopyFailure)?);
                Ok(())
            },
            |_| Ok(()),
        )
    }

    /// 定位读偏移，等同于 set-read-offset
    pub fn seek(&self, offset: u64) -> u64 {
        self.control().set_read_offset(offset);
        offset
    }

    /// 控制请求
    pub fn ioctl(&self, cmd: u32, arg: &mut [u8]) -> PciepResult<usize> {
        self.control().dispatch(cmd, arg)
    }

    /// 中断入口
    ///
    /// 应该在 OS 的中断处理程序中调用。
    pub fn handle_irq(&self, irq: PciepIrq) {
        match irq {
            PciepIrq::ReadDone => self.handle_read_irq(),
            PciepIrq::WriteDone => self.handle_write_irq(),
            PciepIrq::HostDone => self.handle_host_done_irq(),
        }
    }

    pub fn handle_read_irq(&self) {
        self.read_chan.complete_from_irq(&self.regs);
    }

    pub fn handle_write_irq(&self) {
        self.write_chan.complete_from_irq(&self.regs);
    }

    /// 会话结束: 确认中断源并清除两个方向的传输完成标志
    pub fn handle_host_done_irq(&self) {
        self.regs.read(PCIRC_HOST_DONE_INTR);
        ChannelRegs::READ.set_done(&self.regs, false);
        ChannelRegs::WRITE.set_done(&self.regs, false);
        self.session.signal();
        debug!("host done");
    }

    /// 等待主机完成中断，返回是否在超时前到达
    ///
    /// 不影响两个方向的传输。
    pub fn wait_host_done(&self, timeout: Option<Duration>) -> bool {
        self.session.wait_for(timeout)
    }
}

fn to_ax<T>(op: &str, result: PciepResult<T>) -> AxResult<T> {
    result.map_err(|e| {
        error!("pciep {} error: {:?}", op, e);
        e.into()
    })
}

impl<R: RegisterIo + 'static> DeviceOps for PciepDevice<R> {
    fn open(&self) -> AxResult<()> {
        PciepDevice::open(self);
        Ok(())
    }

    fn release(&self) -> AxResult<()> {
        PciepDevice::release(self);
        Ok(())
    }

    fn read_at(&self, buf: &mut [u8], _offset: u64) -> AxResult<usize> {
        let count = buf.len();
        to_ax("read", self.read(buf, count))
    }

    fn write_at(&self, buf: &[u8], _offset: u64) -> AxResult<usize> {
        to_ax("write", self.write(buf, buf.len()))
    }

    fn seek(&self, offset: u64) -> AxResult<u64> {
        Ok(PciepDevice::seek(self, offset))
    }

    fn ioctl(&self, cmd: u32, arg: &mut [u8]) -> AxResult<usize> {
        debug!("pciep ioctl: cmd={:#x}, arg_len={}", cmd, arg.len());
        to_ax("ioctl", PciepDevice::ioctl(self, cmd, arg))
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}
