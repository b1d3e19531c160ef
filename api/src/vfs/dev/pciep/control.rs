//! 控制请求
//!
//! 每个请求都是同步、非阻塞的单次寄存器读解码或寄存器写，
//! 除所涉及的寄存器外没有其他副作用。解码结果从不缓存。

use pciep_core::{PciepError, PciepResult, RegisterIo};
use zerocopy::{FromBytes, Immutable, IntoBytes};

use super::regs::*;
use super::types::{ControlRequest, EncParams, Resolution, UsecaseMode};

/// 控制寄存器视图
pub struct ControlPort<'a, R> {
    regs: &'a R,
}

impl<'a, R: RegisterIo> ControlPort<'a, R> {
    pub fn new(regs: &'a R) -> Self {
        Self { regs }
    }

    /// 64 位文件长度，低字在 0x40，高字在相邻的 0x3c
    pub fn file_length(&self) -> u64 {
        let low = self.regs.read(PCIRC_READ_FILE_LENGTH) as u64;
        let high = self.regs.read(PCIRC_READ_FILE_LENGTH_HIGH) as u64;
        low | high << 32
    }

    pub fn enc_params(&self) -> EncParams {
        EncParams::decode(PCIRC_ENC_PARAMS.map(|off| self.regs.read(off)))
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::decode(self.regs.read(PCIRC_RAW_RESOLUTION))
    }

    fn usecase(&self) -> UsecaseMode {
        UsecaseMode::decode(self.regs.read(PCIRC_USECASE_MODE))
    }

    pub fn mode(&self) -> u32 {
        self.usecase().mode
    }

    pub fn fps(&self) -> u32 {
        self.usecase().fps
    }

    pub fn format(&self) -> u32 {
        self.usecase().format
    }

    pub fn set_read_offset(&self, offset: u64) {
        ChannelRegs::READ.set_offset(self.regs, offset);
    }

    pub fn set_write_offset(&self, offset: u64) {
        ChannelRegs::WRITE.set_offset(self.regs, offset);
    }

    pub fn set_read_transfer_done(&self, done: bool) {
        ChannelRegs::READ.set_done(self.regs, done);
    }

    pub fn set_write_transfer_done(&self, done: bool) {
        ChannelRegs::WRITE.set_done(self.regs, done);
    }

    /// 分发控制请求
    ///
    /// `arg` 是调用者的参数内存: 查询类请求把结果写到开头，偏移类请求从开头
    /// 读取一个 `u64`。返回写回的字节数。
    pub fn dispatch(&self, cmd: u32, arg: &mut [u8]) -> PciepResult<usize> {
        let request = ControlRequest::try_from(cmd).map_err(|_| {
            warn!("Unknown control request: {:#x}", cmd);
            PciepError::Unsupported
        })?;
        debug!("control request {:?}", request);

        match request {
            ControlRequest::GetFileLength => copy_out(&self.file_length(), arg),
            ControlRequest::GetEncParams => copy_out(&self.enc_params(), arg),
            ControlRequest::GetResolution => copy_out(&self.resolution(), arg),
            ControlRequest::GetMode => copy_out(&self.mode(), arg),
            ControlRequest::GetFps => copy_out(&self.fps(), arg),
            ControlRequest::GetFormat => copy_out(&self.format(), arg),
            ControlRequest::SetReadOffset => {
                self.set_read_offset(copy_in(arg)?);
                Ok(0)
            }
            ControlRequest::SetWriteOffset => {
                self.set_write_offset(copy_in(arg)?);
                Ok(0)
            }
            ControlRequest::SetReadTransferDone => {
                self.set_read_transfer_done(true);
                Ok(0)
            }
            ControlRequest::ClrReadTransferDone => {
                self.set_read_transfer_done(false);
                Ok(0)
            }
            ControlRequest::SetWriteTransferDone => {
                self.set_write_transfer_done(true);
                Ok(0)
            }
            ControlRequest::ClrWriteTransferDone => {
                self.set_write_transfer_done(false);
                Ok(0)
            }
        }
    }
}

/// 把结果写入调用者内存
fn copy_out<T: IntoBytes + Immutable>(value: &T, arg: &mut [u8]) -> PciepResult<usize> {
    value
        .write_to_prefix(arg)
        .map_err(|_| PciepError::CopyFailure)?;
    Ok(core::mem::size_of_val(value))
}

/// 从调用者内存读取参数
fn copy_in<T: FromBytes>(arg: &[u8]) -> PciepResult<T> {
    T::read_from_prefix(arg)
        .map(|(value, _)| value)
        .map_err(|_| PciepError::CopyFailure)
}
