//! PCIe endpoint 设备文件
//!
//! 实现 FileLike trait。创建时打开会话，drop 时关闭会话。

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axerrno::AxResult;
use pciep_core::{MmioRegs, RegisterIo};

use crate::vfs::DeviceOps;
use crate::vfs::dev::pciep::PciepDevice;

use super::{FileLike, Kstat, S_IFCHR};

/// 设备节点上打开的一个文件
pub struct PciepFile<R: RegisterIo + 'static = MmioRegs> {
    device: Arc<PciepDevice<R>>,
    path: String,
    /// 最近一次 seek 的位置
    pos: AtomicU64,
}

impl<R: RegisterIo + 'static> PciepFile<R> {
    /// 打开设备，复位两个方向的寄存器
    pub fn open(device: Arc<PciepDevice<R>>) -> AxResult<Self> {
        DeviceOps::open(device.as_ref())?;
        let config = device.config();
        let path = format!("/dev/{}{}", config.name, config.minor);
        Ok(Self {
            device,
            path,
            pos: AtomicU64::new(0),
        })
    }

    pub fn device(&self) -> &Arc<PciepDevice<R>> {
        &self.device
    }

    pub fn position(&self) -> u64 {
        self.pos.load(Ordering::SeqCst)
    }
}

impl<R: RegisterIo + 'static> FileLike for PciepFile<R> {
    fn read(&self, dst: &mut [u8]) -> AxResult<usize> {
        self.device.read_at(dst, self.position())
    }

    fn write(&self, src: &[u8]) -> AxResult<usize> {
        self.device.write_at(src, self.position())
    }

    fn seek(&self, pos: u64) -> AxResult<u64> {
        let pos = DeviceOps::seek(self.device.as_ref(), pos)?;
        self.pos.store(pos, Ordering::SeqCst);
        Ok(pos)
    }

    fn stat(&self) -> AxResult<Kstat> {
        Ok(Kstat {
            mode: S_IFCHR | 0o600,
            rdev: self.device.config().minor as u64,
            ..Default::default()
        })
    }

    fn path(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.path)
    }

    fn ioctl(&self, cmd: u32, arg: &mut [u8]) -> AxResult<usize> {
        DeviceOps::ioctl(self.device.as_ref(), cmd, arg)
    }
}

impl<R: RegisterIo + 'static> Drop for PciepFile<R> {
    fn drop(&mut self) {
        debug!("Dropping PciepFile {}", self.path);
        if let Err(e) = DeviceOps::release(self.device.as_ref()) {
            error!("Failed to release {}: {:?}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::dev::pciep::regs::*;
    use crate::vfs::dev::pciep::{ControlRequest, PciepConfig};
    use pciep_core::{HostDmaAllocator, ShadowRegisters};

    fn device(minor: u32) -> Arc<PciepDevice<ShadowRegisters>> {
        Arc::new(PciepDevice::new(
            ShadowRegisters::new(PCIEP_REG_SPACE),
            Arc::new(HostDmaAllocator::new()),
            PciepConfig {
                minor,
                ..Default::default()
            },
        ))
    }

    #[test]
    fn open_and_drop_bracket_the_session() {
        let dev = device(3);
        dev.regs().write(PCIEP_WRITE_BUFFER_SIZE, 77);
        let file = PciepFile::open(dev.clone()).unwrap();
        assert!(dev.is_open());
        assert_eq!(dev.regs().read(PCIEP_WRITE_BUFFER_SIZE), 0);
        assert_eq!(file.path(), "/dev/pciep3");

        file.seek(0x2_0040).unwrap();
        assert_eq!(file.position(), 0x2_0040);
        drop(file);
        assert!(!dev.is_open());
        assert_eq!(dev.regs().read(PCIEP_READ_BUFFER_OFFSET), 0);
        assert_eq!(dev.regs().read(PCIEP_READ_BUFFER_READY), 0);
    }

    #[test]
    fn ioctl_goes_through_the_device() {
        let dev = device(0);
        dev.regs().write(PCIRC_READ_FILE_LENGTH, 1234);
        let file = PciepFile::open(dev).unwrap();
        let mut arg = [0u8; 8];
        let n = file
            .ioctl(u32::from(ControlRequest::GetFileLength), &mut arg)
            .unwrap();
        assert_eq!(n, 8);
        assert_eq!(u64::from_ne_bytes(arg), 1234);
    }

    #[test]
    fn stat_reports_char_device() {
        let file = PciepFile::open(device(5)).unwrap();
        let st = file.stat().unwrap();
        assert_eq!(st.mode & S_IFCHR, S_IFCHR);
        assert_eq!(st.rdev, 5);
    }
}
