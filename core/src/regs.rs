//! 寄存器访问接口
//!
//! 控制块由 32 位字组成，按字节偏移寻址。所有访问都是按字进行、
//! 不缓存、不重排的；硬件保证单字访问的原子性。

use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// 32 位寄存器块的读写接口
pub trait RegisterIo: Send + Sync {
    /// 读取寄存器
    fn read(&self, offset: usize) -> u32;

    /// 写入寄存器
    fn write(&self, offset: usize, value: u32);

    /// 读-改-写
    #[inline]
    fn modify(&self, offset: usize, f: impl FnOnce(u32) -> u32)
    where
        Self: Sized,
    {
        let value = self.read(offset);
        self.write(offset, f(value));
    }
}

impl<R: RegisterIo + ?Sized> RegisterIo for &R {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }
}

impl<R: RegisterIo + ?Sized> RegisterIo for Arc<R> {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        (**self).read(offset)
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        (**self).write(offset, value)
    }
}

/// 内存映射的寄存器块
pub struct MmioRegs {
    base: *mut u8,
    size: usize,
}

// SAFETY: 寄存器访问是通过内存映射进行的，单字访问由总线保证原子性，
// 多字序列的互斥由上层的传输通道负责
unsafe impl Sync for MmioRegs {}
unsafe impl Send for MmioRegs {}

impl MmioRegs {
    /// 创建寄存器操作实例
    ///
    /// # Safety
    /// 调用者必须确保 `base` 指向有效的寄存器映射，且在实例生命周期内
    /// `size` 字节范围一直可访问
    pub const unsafe fn new(base: *mut u8, size: usize) -> Self {
        Self { base, size }
    }

    /// 获取基地址
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// 映射区域大小
    pub fn size(&self) -> usize {
        self.size
    }
}

impl RegisterIo for MmioRegs {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.size);
        let value = unsafe { read_volatile((self.base as usize + offset) as *const u32) };
        #[cfg(feature = "reg-trace")]
        trace!("mmio read  [{:#04x}] -> {:#010x}", offset, value);
        value
    }

    #[inline]
    fn write(&self, offset: usize, value: u32) {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.size);
        #[cfg(feature = "reg-trace")]
        trace!("mmio write [{:#04x}] <- {:#010x}", offset, value);
        unsafe { write_volatile((self.base as usize + offset) as *mut u32, value) }
    }
}

/// 内存中的寄存器文件
///
/// 用于没有实际端点的主机环境和测试。越界读返回 0，越界写被丢弃。
pub struct ShadowRegisters {
    words: Box<[AtomicU32]>,
}

impl ShadowRegisters {
    /// 创建 `size` 字节、全部清零的寄存器文件
    pub fn new(size: usize) -> Self {
        let words = (0..size / 4).map(|_| AtomicU32::new(0)).collect();
        Self { words }
    }

    /// 寄存器文件大小 (字节)
    pub fn size(&self) -> usize {
        self.words.len() * 4
    }

    fn slot(&self, offset: usize) -> Option<&AtomicU32> {
        if offset % 4 != 0 {
            return None;
        }
        self.words.get(offset / 4)
    }
}

impl RegisterIo for ShadowRegisters {
    fn read(&self, offset: usize) -> u32 {
        let value = self
            .slot(offset)
            .map(|w| w.load(Ordering::SeqCst))
            .unwrap_or(0);
        #[cfg(feature = "reg-trace")]
        trace!("shadow read  [{:#04x}] -> {:#010x}", offset, value);
        value
    }

    fn write(&self, offset: usize, value: u32) {
        #[cfg(feature = "reg-trace")]
        trace!("shadow write [{:#04x}] <- {:#010x}", offset, value);
        match self.slot(offset) {
            Some(w) => w.store(value, Ordering::SeqCst),
            None => warn!("Dropped write to invalid register offset {:#x}", offset),
        }
    }
}
