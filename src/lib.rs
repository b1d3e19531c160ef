//! PCIe endpoint register-space DMA driver
//!
//! 模块生命周期: `module_init` 建立次设备号分配器和设备类，
//! `probe` 为每个寄存器空间实例创建设备节点，`remove`/`module_exit` 反向拆除。

#[macro_use]
extern crate log;

use std::collections::BTreeMap;
use std::sync::Arc;

use pciep_core::registry::DriverRegistry;
use pciep_core::{DmaAllocator, PciepError, PciepResult, RegisterIo};
use spin::Mutex;

pub use pciep_api::file::{FileLike, PciepFile};
pub use pciep_api::vfs::DeviceOps;
pub use pciep_api::vfs::dev::pciep::*;

/// 已注册的驱动: 设备号、设备类以及已探测的实例
pub struct Driver {
    registry: DriverRegistry,
    devices: BTreeMap<u32, Arc<dyn DeviceOps>>,
}

impl Driver {
    pub fn new() -> Self {
        Self {
            registry: DriverRegistry::new(DRIVER_NAME, DEVICE_MAX_NUM),
            devices: BTreeMap::new(),
        }
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// 探测一个实例并创建 `<name><minor>` 节点
    pub fn probe<R: RegisterIo + 'static>(
        &mut self,
        regs: R,
        allocator: Arc<dyn DmaAllocator>,
        config: PciepConfig,
    ) -> PciepResult<Arc<PciepDevice<R>>> {
        if self.devices.len() >= MAX_INSTANCES {
            error!("too many {} instances (max {})", DRIVER_NAME, MAX_INSTANCES);
            return Err(PciepError::Busy);
        }
        let minor = config.minor;
        let node = self.registry.register(minor)?;
        let device = Arc::new(PciepDevice::new(regs, allocator, config));
        self.devices.insert(minor, device.clone());
        info!("{} probed as /dev/{}", DRIVER_NAME, node);
        Ok(device)
    }

    /// 移除实例，返回是否存在
    pub fn remove(&mut self, minor: u32) -> bool {
        let had_device = self.devices.remove(&minor).is_some();
        let had_node = self.registry.unregister(minor);
        if had_device {
            info!("{}{} removed", DRIVER_NAME, minor);
        }
        had_device || had_node
    }

    pub fn device(&self, minor: u32) -> Option<Arc<dyn DeviceOps>> {
        self.devices.get(&minor).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        let minors: Vec<u32> = self.devices.keys().copied().collect();
        for minor in minors {
            self.remove(minor);
        }
    }
}

/// 全局驱动实例
static DRIVER: Mutex<Option<Driver>> = Mutex::new(None);

/// 注册驱动，重复注册返回 `Busy`
pub fn module_init() -> PciepResult<()> {
    let mut driver = DRIVER.lock();
    if driver.is_some() {
        warn!("{} already registered", DRIVER_NAME);
        return Err(PciepError::Busy);
    }
    *driver = Some(Driver::new());
    info!("{} driver registered ({})", DRIVER_NAME, OF_COMPATIBLE);
    Ok(())
}

/// 注销驱动并移除所有实例
pub fn module_exit() {
    if DRIVER.lock().take().is_some() {
        info!("{} driver unregistered", DRIVER_NAME);
    }
}

/// 在全局驱动上探测实例
pub fn probe<R: RegisterIo + 'static>(
    regs: R,
    allocator: Arc<dyn DmaAllocator>,
    config: PciepConfig,
) -> PciepResult<Arc<PciepDevice<R>>> {
    DRIVER
        .lock()
        .as_mut()
        .ok_or_else(|| {
            error!("{} driver not registered", DRIVER_NAME);
            PciepError::InvalidArgument
        })?
        .probe(regs, allocator, config)
}

/// 从全局驱动移除实例
pub fn remove(minor: u32) -> bool {
    DRIVER
        .lock()
        .as_mut()
        .is_some_and(|driver| driver.remove(minor))
}

/// 按次设备号查找全局驱动上的实例
pub fn device(minor: u32) -> Option<Arc<dyn DeviceOps>> {
    DRIVER.lock().as_ref().and_then(|driver| driver.device(minor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pciep_api::vfs::dev::pciep::regs::PCIEP_REG_SPACE;
    use pciep_core::{HostDmaAllocator, ShadowRegisters};

    fn instance(driver: &mut Driver, minor: u32) -> PciepResult<Arc<PciepDevice<ShadowRegisters>>> {
        driver.probe(
            ShadowRegisters::new(PCIEP_REG_SPACE),
            Arc::new(HostDmaAllocator::new()),
            PciepConfig {
                minor,
                ..Default::default()
            },
        )
    }

    #[test]
    fn probe_creates_nodes() {
        let mut driver = Driver::new();
        instance(&mut driver, 0).unwrap();
        instance(&mut driver, 7).unwrap();
        assert_eq!(driver.len(), 2);
        assert_eq!(driver.registry().class.node(7), Some("pciep7"));
        assert!(driver.device(7).is_some());
        assert!(driver.device(1).is_none());
    }

    #[test]
    fn duplicate_or_out_of_range_minor_rolls_back() {
        let mut driver = Driver::new();
        instance(&mut driver, 2).unwrap();
        assert_eq!(instance(&mut driver, 2).err(), Some(PciepError::Busy));
        assert_eq!(
            instance(&mut driver, DEVICE_MAX_NUM).err(),
            Some(PciepError::InvalidArgument)
        );
        assert_eq!(driver.len(), 1);
        assert_eq!(driver.registry().minors.in_use(), 1);
    }

    #[test]
    fn instance_limit() {
        let mut driver = Driver::new();
        for minor in 0..MAX_INSTANCES as u32 {
            instance(&mut driver, minor).unwrap();
        }
        assert_eq!(instance(&mut driver, 100).err(), Some(PciepError::Busy));
        assert_eq!(driver.registry().minors.in_use(), MAX_INSTANCES);
    }

    #[test]
    fn remove_frees_minor() {
        let mut driver = Driver::new();
        instance(&mut driver, 4).unwrap();
        assert!(driver.remove(4));
        assert!(!driver.remove(4));
        assert!(driver.is_empty());
        assert_eq!(driver.registry().class.node(4), None);
        instance(&mut driver, 4).unwrap();
    }

    #[test]
    fn global_lifecycle() {
        let regs = || ShadowRegisters::new(PCIEP_REG_SPACE);
        let alloc = Arc::new(HostDmaAllocator::new());

        assert_eq!(
            probe(regs(), alloc.clone(), PciepConfig::default()).err(),
            Some(PciepError::InvalidArgument)
        );
        module_init().unwrap();
        assert_eq!(module_init(), Err(PciepError::Busy));

        let dev = probe(regs(), alloc.clone(), PciepConfig::default()).unwrap();
        assert!(device(0).is_some());
        let file = PciepFile::open(dev).unwrap();
        assert_eq!(file.path(), "/dev/pciep0");
        drop(file);

        assert!(remove(0));
        assert!(device(0).is_none());
        module_exit();
        assert!(!remove(0));
        assert_eq!(alloc.live_regions(), 0);
    }
}
