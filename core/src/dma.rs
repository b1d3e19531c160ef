//! DMA 缓冲区管理
//!
//! 每个方向同一时刻最多只有一个存活的一致性缓冲区。缓冲区每次传输时
//! 重新分配，传输结束 (成功、拷贝失败) 后立即释放。

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::collections::BTreeMap;
use std::sync::Arc;

use memory_addr::PhysAddr;
use spin::Mutex;

use crate::error::{PciepError, PciepResult};

/// 一致性内存对齐
pub const DMA_ALIGN: usize = 4096;

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DmaDirection {
    /// 设备到主机 (read 路径)
    DeviceToHost = 0,
    /// 主机到设备 (write 路径)
    HostToDevice = 1,
}

impl DmaDirection {
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// 一致性内存信息 (CPU 地址 + 设备可见地址)
#[derive(Debug, Clone, Copy)]
pub struct DmaInfo {
    pub cpu_addr: NonNull<u8>,
    pub bus_addr: PhysAddr,
}

/// 一致性内存分配器
pub trait DmaAllocator: Send + Sync {
    /// 分配 CPU 与设备同时可见的内存
    ///
    /// # Safety
    /// 返回的内存必须且只能通过 [`dealloc_coherent`](Self::dealloc_coherent)
    /// 以相同的 `layout` 释放一次
    unsafe fn alloc_coherent(&self, layout: Layout) -> PciepResult<DmaInfo>;

    /// 释放一致性内存
    ///
    /// # Safety
    /// `info` 与 `layout` 必须来自同一次成功的分配
    unsafe fn dealloc_coherent(&self, info: DmaInfo, layout: Layout);
}

/// 基于堆内存的一致性分配器
///
/// 设备可见地址在一个 32 位窗口中首次适配分配，释放的区间可以复用。
/// 可选的字节预算用于模拟一致性内存耗尽。
pub struct HostDmaAllocator {
    inner: Mutex<HostDmaInner>,
    budget: Option<usize>,
}

struct HostDmaInner {
    in_use: usize,
    /// 设备可见起始地址 -> (CPU 地址, 长度)
    regions: BTreeMap<u64, (usize, usize)>,
}

impl HostDmaInner {
    /// 窗口中第一个能容纳 `span` 字节的空隙
    fn find_gap(&self, span: u64) -> Option<u64> {
        let mut cursor = HostDmaAllocator::BUS_BASE;
        for (&start, &(_, len)) in &self.regions {
            if start - cursor >= span {
                return Some(cursor);
            }
            cursor = start + (len as u64).next_multiple_of(DMA_ALIGN as u64);
        }
        (HostDmaAllocator::BUS_LIMIT - cursor >= span).then_some(cursor)
    }
}

impl HostDmaAllocator {
    /// 设备可见地址窗口起点
    pub const BUS_BASE: u64 = 0x1000_0000;
    /// 设备可见地址窗口终点 (不含)
    pub const BUS_LIMIT: u64 = 0x1_0000_0000;

    pub fn new() -> Self {
        Self::with_budget(None)
    }

    /// 最多同时分配 `budget` 字节
    pub fn with_budget(budget: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(HostDmaInner {
                in_use: 0,
                regions: BTreeMap::new(),
            }),
            budget,
        }
    }

    /// 当前已分配的字节数
    pub fn bytes_in_use(&self) -> usize {
        self.inner.lock().in_use
    }

    /// 当前存活的区域数量
    pub fn live_regions(&self) -> usize {
        self.inner.lock().regions.len()
    }

    /// 按设备可见地址查找区域，返回 CPU 地址和长度
    ///
    /// 端点模拟器通过它以设备的视角访问缓冲区。
    pub fn resolve(&self, bus_addr: PhysAddr) -> Option<(NonNull<u8>, usize)> {
        let bus = bus_addr.as_usize() as u64;
        let inner = self.inner.lock();
        let (&start, &(cpu, len)) = inner.regions.range(..=bus).next_back()?;
        if bus >= start + len as u64 {
            return None;
        }
        let delta = (bus - start) as usize;
        NonNull::new((cpu + delta) as *mut u8).map(|p| (p, len - delta))
    }
}

impl Default for HostDmaAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaAllocator for HostDmaAllocator {
    unsafe fn alloc_coherent(&self, layout: Layout) -> PciepResult<DmaInfo> {
        let layout = layout
            .align_to(DMA_ALIGN)
            .map_err(|_| PciepError::InvalidArgument)?;
        let mut inner = self.inner.lock();

        if let Some(budget) = self.budget {
            if inner.in_use + layout.size() > budget {
                return Err(PciepError::OutOfMemory);
            }
        }

        let span = layout.size().max(1).next_multiple_of(DMA_ALIGN) as u64;
        let Some(bus) = inner.find_gap(span) else {
            warn!("No {:#x}-byte gap left in the bus window", span);
            return Err(PciepError::OutOfMemory);
        };

        let cpu = unsafe { std::alloc::alloc_zeroed(layout) };
        let cpu_addr = NonNull::new(cpu).ok_or(PciepError::OutOfMemory)?;

        inner.in_use += layout.size();
        inner
            .regions
            .insert(bus, (cpu_addr.as_ptr() as usize, layout.size()));

        Ok(DmaInfo {
            cpu_addr,
            bus_addr: PhysAddr::from_usize(bus as usize),
        })
    }

    unsafe fn dealloc_coherent(&self, info: DmaInfo, layout: Layout) {
        let Ok(layout) = layout.align_to(DMA_ALIGN) else {
            return;
        };
        let mut inner = self.inner.lock();
        let bus = info.bus_addr.as_usize() as u64;
        if inner.regions.remove(&bus).is_none() {
            error!("Freeing unknown DMA region at bus {:#x}", bus);
            return;
        }
        inner.in_use -= layout.size();
        unsafe { std::alloc::dealloc(info.cpu_addr.as_ptr(), layout) };
    }
}

/// 一次传输的缓冲区描述符
///
/// 持有期间独占该方向的缓冲区槽位，drop 时释放内存并归还槽位。
pub struct DmaBuffer {
    manager: Arc<DmaBufferManager>,
    direction: DmaDirection,
    info: DmaInfo,
    len: usize,
}

// SAFETY: 缓冲区只被所属方向的传输路径访问，设备侧的访问由就绪/完成握手排序
unsafe impl Send for DmaBuffer {}
unsafe impl Sync for DmaBuffer {}

impl DmaBuffer {
    pub fn direction(&self) -> DmaDirection {
        self.direction
    }

    /// CPU 侧地址
    pub fn cpu_addr(&self) -> NonNull<u8> {
        self.info.cpu_addr
    }

    /// 设备可见地址
    pub fn bus_addr(&self) -> PhysAddr {
        self.info.bus_addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.info.cpu_addr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.info.cpu_addr.as_ptr(), self.len) }
    }

    /// 显式释放
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        self.manager.release_raw(self.direction, self.info, self.len);
    }
}

impl core::fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("direction", &self.direction)
            .field("cpu_addr", &self.info.cpu_addr)
            .field("bus_addr", &format_args!("{:#x}", self.info.bus_addr.as_usize()))
            .field("len", &self.len)
            .finish()
    }
}

/// DMA 缓冲区管理器
pub struct DmaBufferManager {
    allocator: Arc<dyn DmaAllocator>,
    /// 每个方向是否有存活的缓冲区
    live: [AtomicBool; 2],
    /// 设备可见地址位宽
    addr_bits: u32,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl DmaBufferManager {
    pub fn new(allocator: Arc<dyn DmaAllocator>, addr_bits: u32) -> Self {
        Self {
            allocator,
            live: [AtomicBool::new(false), AtomicBool::new(false)],
            addr_bits,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// 分配 `count` 字节的一致性缓冲区
    pub fn acquire(self: &Arc<Self>, direction: DmaDirection, count: usize) -> PciepResult<DmaBuffer> {
        if count == 0 {
            return Err(PciepError::InvalidArgument);
        }
        let layout = Layout::from_size_align(count, 1).map_err(|_| PciepError::InvalidArgument)?;

        let slot = &self.live[direction.index()];
        if slot.swap(true, Ordering::SeqCst) {
            warn!("DMA buffer for {:?} is still live", direction);
            return Err(PciepError::Busy);
        }

        let info = match unsafe { self.allocator.alloc_coherent(layout) } {
            Ok(info) => info,
            Err(e) => {
                slot.store(false, Ordering::SeqCst);
                error!("alloc_coherent({} bytes) failed: {:?}", count, e);
                return Err(PciepError::OutOfMemory);
            }
        };

        if !self.bus_addr_fits(info.bus_addr) {
            error!(
                "Bus address {:#x} exceeds {}-bit DMA mask",
                info.bus_addr.as_usize(),
                self.addr_bits
            );
            unsafe { self.allocator.dealloc_coherent(info, layout) };
            slot.store(false, Ordering::SeqCst);
            return Err(PciepError::OutOfMemory);
        }

        self.acquired.fetch_add(1, Ordering::SeqCst);
        debug!(
            "DMA acquire {:?}: bus={:#x}, len={}",
            direction,
            info.bus_addr.as_usize(),
            count
        );

        Ok(DmaBuffer {
            manager: self.clone(),
            direction,
            info,
            len: count,
        })
    }

    fn release_raw(&self, direction: DmaDirection, info: DmaInfo, len: usize) {
        debug!("DMA release {:?}: bus={:#x}, len={}", direction, info.bus_addr.as_usize(), len);
        if let Ok(layout) = Layout::from_size_align(len, 1) {
            unsafe { self.allocator.dealloc_coherent(info, layout) };
        }
        self.released.fetch_add(1, Ordering::SeqCst);
        self.live[direction.index()].store(false, Ordering::SeqCst);
    }

    fn bus_addr_fits(&self, bus_addr: PhysAddr) -> bool {
        self.addr_bits >= 64 || (bus_addr.as_usize() as u64) >> self.addr_bits == 0
    }

    /// 该方向是否有存活的缓冲区
    pub fn is_live(&self, direction: DmaDirection) -> bool {
        self.live[direction.index()].load(Ordering::SeqCst)
    }

    /// (成功分配次数, 释放次数)
    pub fn stats(&self) -> (usize, usize) {
        (
            self.acquired.load(Ordering::SeqCst),
            self.released.load(Ordering::SeqCst),
        )
    }
}
