//! 字符设备文件操作接口

use core::any::Any;

use axerrno::AxResult;

/// 设备节点上的文件操作
///
/// `arg` 是调用者提供的参数内存，控制请求从中读取输入、把结果写回。
pub trait DeviceOps: Send + Sync {
    /// 打开会话
    fn open(&self) -> AxResult<()> {
        Ok(())
    }

    /// 关闭会话
    fn release(&self) -> AxResult<()> {
        Ok(())
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> AxResult<usize>;

    fn write_at(&self, buf: &[u8], offset: u64) -> AxResult<usize>;

    /// 重新定位，返回新的位置
    fn seek(&self, offset: u64) -> AxResult<u64> {
        Ok(offset)
    }

    fn ioctl(&self, cmd: u32, arg: &mut [u8]) -> AxResult<usize>;

    fn as_any(&self) -> &dyn Any;
}
