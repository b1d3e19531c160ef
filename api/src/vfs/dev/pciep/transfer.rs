//! 单方向传输状态机
//!
//! `Idle -> Allocated -> Announced -> AwaitingCompletion -> Drained -> Idle`
//!
//! 每个方向同一时刻只允许一个传输。通道锁覆盖从分配到释放的整个握手，
//! 中断路径只清就绪位并发出完成信号，缓冲区的拷贝和释放都回到请求路径上完成。

use core::sync::atomic::{AtomicU8, Ordering};
use core::time::Duration;
use std::sync::Arc;

use num_enum::TryFromPrimitive;
use pciep_core::{
    Completion, DmaBuffer, DmaBufferManager, DmaDirection, PciepError, PciepResult, RegisterIo,
};
use spin::Mutex;

use super::regs::ChannelRegs;

/// 传输状态
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum TransferState {
    /// 空闲
    Idle = 0,
    /// 已分配缓冲区
    Allocated = 1,
    /// 地址/长度/就绪位已写入
    Announced = 2,
    /// 等待完成中断
    AwaitingCompletion = 3,
    /// 已完成，正在拷贝/释放
    Drained = 4,
}

/// 单方向传输通道
pub struct TransferChannel {
    direction: DmaDirection,
    regs: ChannelRegs,
    completion: Completion,
    state: AtomicU8,
    /// 握手锁；超时后设备可能仍在访问的缓冲区暂存在这里
    slot: Mutex<Option<DmaBuffer>>,
    timeout: Option<Duration>,
}

impl TransferChannel {
    pub fn new(direction: DmaDirection, timeout: Option<Duration>) -> Self {
        Self {
            direction,
            regs: ChannelRegs::for_direction(direction),
            completion: Completion::new(),
            state: AtomicU8::new(TransferState::Idle as u8),
            slot: Mutex::new(None),
            timeout,
        }
    }

    pub fn direction(&self) -> DmaDirection {
        self.direction
    }

    pub fn regs(&self) -> &ChannelRegs {
        &self.regs
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    /// 当前状态
    pub fn state(&self) -> TransferState {
        TransferState::try_from(self.state.load(Ordering::SeqCst)).unwrap_or(TransferState::Idle)
    }

    fn set_state(&self, state: TransferState) {
        trace!("{:?}: -> {:?}", self.direction, state);
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// 执行一次完整的握手
    ///
    /// `fill` 在交出缓冲区之前运行 (写路径拷入数据)，`drain` 在完成之后运行
    /// (读路径拷出数据)。任一回调失败时缓冲区照常释放。成功时返回字节数。
    pub fn transfer<R: RegisterIo>(
        &self,
        regs: &R,
        dma: &Arc<DmaBufferManager>,
        count: usize,
        fill: impl FnOnce(&mut [u8]) -> PciepResult<()>,
        drain: impl FnOnce(&[u8]) -> PciepResult<()>,
    ) -> PciepResult<usize> {
        if count == 0 {
            return Err(PciepError::InvalidArgument);
        }
        let count_reg = u32::try_from(count).map_err(|_| PciepError::InvalidArgument)?;

        let mut slot = self.slot.try_lock().ok_or_else(|| {
            warn!("{:?} transfer already in flight", self.direction);
            PciepError::Busy
        })?;
        self.reclaim_parked(&mut slot)?;

        let mut buf = dma.acquire(self.direction, count)?;
        self.set_state(TransferState::Allocated);

        let bus_addr = match u32::try_from(buf.bus_addr().as_usize()) {
            Ok(addr) => addr,
            Err(_) => {
                self.set_state(TransferState::Idle);
                return Err(PciepError::OutOfMemory);
            }
        };

        if let Err(e) = fill(buf.as_mut_slice()) {
            drop(buf);
            self.set_state(TransferState::Idle);
            return Err(e);
        }

        self.completion.arm();
        self.regs.announce(regs, bus_addr, count_reg);
        self.set_state(TransferState::Announced);
        debug!(
            "{:?} announced: bus={:#x}, count={}",
            self.direction, bus_addr, count
        );

        self.set_state(TransferState::AwaitingCompletion);
        if !self.completion.wait_for(self.timeout) {
            warn!(
                "{:?} transfer timed out, parking buffer at bus {:#x}",
                self.direction, bus_addr
            );
            *slot = Some(buf);
            return Err(PciepError::Timeout);
        }

        self.set_state(TransferState::Drained);
        let result = drain(buf.as_slice());
        drop(buf);
        self.set_state(TransferState::Idle);

        debug!("{:?} transfer of {} bytes drained", self.direction, count);
        result.map(|_| count)
    }

    /// 释放超时遗留的缓冲区 (仅当迟到的完成已经到达)
    fn reclaim_parked(&self, slot: &mut Option<DmaBuffer>) -> PciepResult<()> {
        let Some(parked) = slot.take() else {
            return Ok(());
        };
        if self.completion.is_done() {
            info!("{:?} late completion arrived, releasing parked buffer", self.direction);
            drop(parked);
            self.set_state(TransferState::Idle);
            Ok(())
        } else {
            *slot = Some(parked);
            Err(PciepError::Busy)
        }
    }

    /// 中断路径: 清就绪位，发出完成信号，最后读清中断源
    pub fn complete_from_irq<R: RegisterIo>(&self, regs: &R) {
        self.regs.clear_ready(regs);
        if !self.completion.signal() {
            debug!("{:?} duplicate completion ignored", self.direction);
        }
        regs.read(self.regs.done_intr);
    }

    /// 强制回到空闲: 清零本方向寄存器并复位完成量
    ///
    /// 超时遗留的缓冲区在迟到的完成到达之前保持存活，完成量也不复位，
    /// 之后的请求照常通过 `reclaim_parked` 回收它。
    pub fn reset<R: RegisterIo>(&self, regs: &R) {
        self.regs.reset(regs);
        let Some(mut slot) = self.slot.try_lock() else {
            warn!("{:?} reset while a transfer is in flight", self.direction);
            return;
        };
        if slot.is_some() {
            if !self.completion.is_done() {
                warn!("{:?} reset keeps parked buffer until completion", self.direction);
                return;
            }
            info!("{:?} reset releases completed parked buffer", self.direction);
            slot.take();
        }
        self.completion.arm();
        self.set_state(TransferState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::dev::pciep::regs::*;
    use memory_addr::PhysAddr;
    use pciep_core::{HostDmaAllocator, ShadowRegisters};
    use std::thread;

    fn setup(timeout: Option<Duration>) -> (
        Arc<ShadowRegisters>,
        Arc<HostDmaAllocator>,
        Arc<DmaBufferManager>,
        Arc<TransferChannel>,
    ) {
        let regs = Arc::new(ShadowRegisters::new(PCIEP_REG_SPACE));
        let alloc = Arc::new(HostDmaAllocator::new());
        let dma = Arc::new(DmaBufferManager::new(alloc.clone(), 32));
        let chan = Arc::new(TransferChannel::new(DmaDirection::DeviceToHost, timeout));
        (regs, alloc, dma, chan)
    }

    /// 等待就绪位，然后像设备一样填充缓冲区并触发中断
    fn fake_device(
        regs: Arc<ShadowRegisters>,
        alloc: Arc<HostDmaAllocator>,
        chan: Arc<TransferChannel>,
        byte: u8,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            while regs.read(PCIEP_READ_BUFFER_READY) & 1 == 0 {
                thread::yield_now();
            }
            let bus = regs.read(PCIEP_READ_BUFFER_ADDR) as usize;
            let size = regs.read(PCIEP_READ_BUFFER_SIZE) as usize;
            let (ptr, len) = alloc.resolve(PhysAddr::from_usize(bus)).unwrap();
            assert_eq!(len, size);
            unsafe { core::ptr::write_bytes(ptr.as_ptr(), byte, size) };
            chan.complete_from_irq(&*regs);
        })
    }

    #[test]
    fn zero_count_touches_nothing() {
        let (regs, alloc, dma, chan) = setup(None);
        let err = chan
            .transfer(&*regs, &dma, 0, |_| Ok(()), |_| Ok(()))
            .unwrap_err();
        assert_eq!(err, PciepError::InvalidArgument);
        assert_eq!(regs.read(PCIEP_READ_BUFFER_SIZE), 0);
        assert_eq!(regs.read(PCIEP_READ_BUFFER_READY), 0);
        assert_eq!(alloc.live_regions(), 0);
    }

    #[test]
    fn read_handshake() {
        let (regs, alloc, dma, chan) = setup(None);
        let dev = fake_device(regs.clone(), alloc.clone(), chan.clone(), 0x42);

        let mut out = vec![0u8; 4096];
        let n = chan
            .transfer(&*regs, &dma, 4096, |_| Ok(()), |buf| {
                out.copy_from_slice(buf);
                Ok(())
            })
            .unwrap();
        dev.join().unwrap();

        assert_eq!(n, 4096);
        assert!(out.iter().all(|&b| b == 0x42));
        assert_eq!(regs.read(PCIEP_READ_BUFFER_READY) & 1, 0);
        assert_eq!(chan.state(), TransferState::Idle);
        assert_eq!(alloc.live_regions(), 0);
        assert!(!dma.is_live(DmaDirection::DeviceToHost));
    }

    #[test]
    fn failed_fill_releases_without_announcing() {
        let (regs, alloc, dma, chan) = setup(None);
        let err = chan
            .transfer(&*regs, &dma, 64, |_| Err(PciepError::CopyFailure), |_| Ok(()))
            .unwrap_err();
        assert_eq!(err, PciepError::CopyFailure);
        assert_eq!(regs.read(PCIEP_READ_BUFFER_READY), 0);
        assert_eq!(regs.read(PCIEP_READ_BUFFER_ADDR), 0);
        assert_eq!(alloc.live_regions(), 0);
        assert_eq!(chan.state(), TransferState::Idle);
    }

    #[test]
    fn failed_drain_still_releases() {
        let (regs, alloc, dma, chan) = setup(None);
        let dev = fake_device(regs.clone(), alloc.clone(), chan.clone(), 1);
        let err = chan
            .transfer(&*regs, &dma, 128, |_| Ok(()), |_| Err(PciepError::CopyFailure))
            .unwrap_err();
        dev.join().unwrap();
        assert_eq!(err, PciepError::CopyFailure);
        assert_eq!(alloc.live_regions(), 0);
    }

    #[test]
    fn timeout_parks_buffer_until_late_completion() {
        let (regs, alloc, dma, chan) = setup(Some(Duration::from_millis(10)));
        let err = chan
            .transfer(&*regs, &dma, 256, |_| Ok(()), |_| Ok(()))
            .unwrap_err();
        assert_eq!(err, PciepError::Timeout);
        // 设备可能仍在访问，缓冲区不能释放
        assert_eq!(alloc.live_regions(), 1);
        assert_eq!(
            chan.transfer(&*regs, &dma, 256, |_| Ok(()), |_| Ok(())).unwrap_err(),
            PciepError::Busy
        );

        // 迟到的完成中断
        chan.complete_from_irq(&*regs);
        let dev = fake_device(regs.clone(), alloc.clone(), chan.clone(), 7);
        assert_eq!(
            chan.transfer(&*regs, &dma, 256, |_| Ok(()), |_| Ok(())),
            Ok(256)
        );
        dev.join().unwrap();
        assert_eq!(alloc.live_regions(), 0);
    }

    #[test]
    fn reset_clears_registers() {
        let (regs, _alloc, _dma, chan) = setup(None);
        for off in [
            PCIEP_READ_BUFFER_READY,
            PCIEP_READ_BUFFER_OFFSET,
            PCIEP_READ_BUFFER_SIZE,
            PCIEP_READ_TRANSFER_DONE,
        ] {
            regs.write(off, 0xffff_ffff);
        }
        chan.completion().signal();
        chan.reset(&*regs);
        assert_eq!(regs.read(PCIEP_READ_BUFFER_READY), 0);
        assert_eq!(regs.read(PCIEP_READ_BUFFER_OFFSET), 0);
        assert_eq!(regs.read(PCIEP_READ_BUFFER_SIZE), 0);
        assert_eq!(regs.read(PCIEP_READ_TRANSFER_DONE), 0);
        assert!(!chan.completion().is_done());
    }

    #[test]
    fn reset_keeps_parked_buffer_until_completion() {
        let (regs, alloc, dma, chan) = setup(Some(Duration::from_millis(10)));
        assert_eq!(
            chan.transfer(&*regs, &dma, 64, |_| Ok(()), |_| Ok(())),
            Err(PciepError::Timeout)
        );

        chan.reset(&*regs);
        assert_eq!(alloc.live_regions(), 1);
        assert!(dma.is_live(DmaDirection::DeviceToHost));
        assert_eq!(regs.read(PCIEP_READ_BUFFER_READY), 0);
        assert_eq!(
            chan.transfer(&*regs, &dma, 64, |_| Ok(()), |_| Ok(())),
            Err(PciepError::Busy)
        );

        // 完成到达后再次复位才释放
        chan.complete_from_irq(&*regs);
        chan.reset(&*regs);
        assert_eq!(alloc.live_regions(), 0);
        assert!(!chan.completion().is_done());
        assert_eq!(chan.state(), TransferState::Idle);
    }
}
