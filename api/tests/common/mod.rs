//! 在线程中模拟 endpoint 侧: 轮询就绪位，访问缓冲区，触发完成中断

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use memory_addr::PhysAddr;
use pciep_api::vfs::dev::pciep::regs::*;
use pciep_api::vfs::dev::pciep::{PciepConfig, PciepDevice};
use pciep_core::{HostDmaAllocator, RegisterIo, ShadowRegisters};

pub type Device = PciepDevice<ShadowRegisters>;

pub fn device_with(config: PciepConfig, budget: Option<usize>) -> (Arc<Device>, Arc<HostDmaAllocator>) {
    let alloc = Arc::new(HostDmaAllocator::with_budget(budget));
    let dev = Arc::new(PciepDevice::new(
        ShadowRegisters::new(PCIEP_REG_SPACE),
        alloc.clone(),
        config,
    ));
    (dev, alloc)
}

pub fn device() -> (Arc<Device>, Arc<HostDmaAllocator>) {
    device_with(PciepConfig::default(), None)
}

pub fn pattern(i: usize) -> u8 {
    (i * 7 + 3) as u8
}

/// 自旋等待直到条件成立
pub fn spin_until(mut cond: impl FnMut() -> bool) {
    while !cond() {
        thread::yield_now();
    }
}

/// endpoint 模拟器
pub struct Endpoint {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    /// 从写缓冲区收到的字节
    pub received: Arc<Mutex<Vec<u8>>>,
    /// 每次服务时观察到的读偏移 (低字)
    pub read_offsets: Arc<Mutex<Vec<u32>>>,
    pub served: Arc<AtomicUsize>,
}

impl Endpoint {
    pub fn spawn(dev: Arc<Device>, alloc: Arc<HostDmaAllocator>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let received = Arc::new(Mutex::new(Vec::new()));
        let read_offsets = Arc::new(Mutex::new(Vec::new()));
        let served = Arc::new(AtomicUsize::new(0));

        let handle = {
            let stop = stop.clone();
            let received = received.clone();
            let read_offsets = read_offsets.clone();
            let served = served.clone();
            thread::spawn(move || {
                let regs = dev.regs();
                while !stop.load(Ordering::SeqCst) {
                    if regs.read(PCIEP_READ_BUFFER_READY) & 1 != 0 {
                        let buf = buffer(&alloc, regs, PCIEP_READ_BUFFER_ADDR, PCIEP_READ_BUFFER_SIZE);
                        for (i, b) in buf.iter_mut().enumerate() {
                            *b = pattern(i);
                        }
                        read_offsets
                            .lock()
                            .unwrap()
                            .push(regs.read(PCIEP_READ_BUFFER_OFFSET));
                        served.fetch_add(1, Ordering::SeqCst);
                        dev.handle_read_irq();
                    }
                    if regs.read(PCIEP_WRITE_BUFFER_READY) & 1 != 0 {
                        let buf = buffer(&alloc, regs, PCIEP_WRITE_BUFFER_ADDR, PCIEP_WRITE_BUFFER_SIZE);
                        received.lock().unwrap().extend_from_slice(buf);
                        served.fetch_add(1, Ordering::SeqCst);
                        dev.handle_write_irq();
                    }
                    thread::yield_now();
                }
            })
        };

        Self {
            stop,
            handle: Some(handle),
            received,
            read_offsets,
            served,
        }
    }
}

fn buffer<'a>(
    alloc: &HostDmaAllocator,
    regs: &ShadowRegisters,
    addr_reg: usize,
    size_reg: usize,
) -> &'a mut [u8] {
    let bus = regs.read(addr_reg) as usize;
    let size = regs.read(size_reg) as usize;
    let (ptr, len) = alloc
        .resolve(PhysAddr::from_usize(bus))
        .expect("announced bus address must be live");
    assert!(size <= len);
    // 请求方在完成中断之前不会访问或释放缓冲区
    unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), size) }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
