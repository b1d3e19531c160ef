pub mod pciep;

use std::borrow::Cow;

use axerrno::{AxError, AxResult};

pub use self::pciep::PciepFile;

/// 字符设备文件类型位
pub const S_IFCHR: u32 = 0o020000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kstat {
    pub ino: u64,
    pub mode: u32,
    pub size: u64,
    pub blksize: u32,
    /// (major << 20) | minor
    pub rdev: u64,
}

impl Default for Kstat {
    fn default() -> Self {
        Self {
            ino: 1,
            mode: 0,
            size: 0,
            blksize: 4096,
            rdev: 0,
        }
    }
}

/// 打开的文件
pub trait FileLike: Send + Sync {
    fn read(&self, _dst: &mut [u8]) -> AxResult<usize> {
        Err(AxError::InvalidInput)
    }

    fn write(&self, _src: &[u8]) -> AxResult<usize> {
        Err(AxError::InvalidInput)
    }

    fn seek(&self, _pos: u64) -> AxResult<u64> {
        Err(AxError::InvalidInput)
    }

    fn stat(&self) -> AxResult<Kstat> {
        Ok(Kstat::default())
    }

    fn path(&self) -> Cow<'_, str>;

    fn ioctl(&self, _cmd: u32, _arg: &mut [u8]) -> AxResult<usize> {
        Err(AxError::NotATty)
    }
}
