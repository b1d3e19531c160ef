//! 错误类型定义

use core::fmt;

use axerrno::AxError;

/// 传输协议错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PciepError {
    /// 字节数为 0 等无效参数
    InvalidArgument,
    /// DMA 缓冲区分配失败
    OutOfMemory,
    /// 与调用者缓冲区之间拷贝失败
    CopyFailure,
    /// 未知的控制命令
    Unsupported,
    /// 同方向已有传输在进行
    Busy,
    /// 等待完成中断超时
    Timeout,
}

impl PciepError {
    /// 获取错误码 (兼容 Linux errno 风格)
    pub fn as_errno(&self) -> i32 {
        match self {
            PciepError::InvalidArgument => -22, // EINVAL
            PciepError::OutOfMemory => -12,     // ENOMEM
            PciepError::CopyFailure => -14,     // EFAULT
            PciepError::Unsupported => -25,     // ENOTTY
            PciepError::Busy => -16,            // EBUSY
            PciepError::Timeout => -110,        // ETIMEDOUT
        }
    }
}

impl fmt::Display for PciepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "Invalid argument"),
            Self::OutOfMemory => write!(f, "Out of memory"),
            Self::CopyFailure => write!(f, "Bad user buffer"),
            Self::Unsupported => write!(f, "Unsupported control request"),
            Self::Busy => write!(f, "Transfer already in flight"),
            Self::Timeout => write!(f, "Timed out waiting for completion"),
        }
    }
}

impl From<PciepError> for AxError {
    fn from(err: PciepError) -> Self {
        match err {
            PciepError::InvalidArgument => AxError::InvalidInput,
            PciepError::OutOfMemory => AxError::NoMemory,
            PciepError::CopyFailure => AxError::BadAddress,
            PciepError::Unsupported => AxError::Unsupported,
            PciepError::Busy => AxError::ResourceBusy,
            PciepError::Timeout => AxError::TimedOut,
        }
    }
}

pub type PciepResult<T> = Result<T, PciepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values() {
        assert_eq!(PciepError::InvalidArgument.as_errno(), -22);
        assert_eq!(PciepError::OutOfMemory.as_errno(), -12);
        assert_eq!(PciepError::Unsupported.as_errno(), -25);
    }

    #[test]
    fn maps_onto_axerrno() {
        assert_eq!(AxError::from(PciepError::InvalidArgument), AxError::InvalidInput);
        assert_eq!(AxError::from(PciepError::OutOfMemory), AxError::NoMemory);
        assert_eq!(AxError::from(PciepError::Unsupported), AxError::Unsupported);
    }
}
