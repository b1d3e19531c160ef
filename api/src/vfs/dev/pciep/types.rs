//! 端点驱动数据结构定义

use core::time::Duration;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use pciep_core::field::{enc1, enc2, enc3, enc4, enc5, resolution, usecase};
use static_assertions::const_assert_eq;
use zerocopy::{Immutable, IntoBytes, KnownLayout};

use super::DRIVER_NAME;

/// 编码参数
/// 对应 C 结构体 enc_params，大小 60 字节
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, IntoBytes, Immutable, KnownLayout)]
pub struct EncParams {
    pub enable_l2cache: bool,
    pub low_bandwidth: bool,
    pub filler_data: bool,
    pub max_picture_size: bool,
    pub bitrate: u32,
    pub gop_len: u32,
    pub b_frame: u32,
    pub slice: u32,
    pub qp_mode: u32,
    pub rc_mode: u32,
    pub enc_type: u32,
    pub gop_mode: u32,
    pub profile: u32,
    pub min_qp: u32,
    pub max_qp: u32,
    pub cpb_size: u32,
    pub initial_delay: u32,
    pub periodicity_idr: u32,
}

const_assert_eq!(core::mem::size_of::<EncParams>(), 60);

impl EncParams {
    /// 从五个编码参数寄存器字解码
    pub fn decode(words: [u32; 5]) -> Self {
        let [w1, w2, w3, w4, w5] = words;
        Self {
            enable_l2cache: enc1::L2_CACHE.decode_bool(w1),
            low_bandwidth: enc1::LOW_BANDWIDTH.decode_bool(w1),
            filler_data: enc1::FILLER_DATA.decode_bool(w1),
            bitrate: enc1::BITRATE.decode(w1),
            gop_len: enc1::GOP_LENGTH.decode(w1),
            max_picture_size: enc1::MAX_PICTURE_SIZE.decode_bool(w1),

            b_frame: enc2::B_FRAME.decode(w2),
            slice: enc2::SLICE.decode(w2),
            qp_mode: enc2::QP_MODE.decode(w2),
            rc_mode: enc2::RC_MODE.decode(w2),
            enc_type: enc2::ENC_TYPE.decode(w2),
            gop_mode: enc2::GOP_MODE.decode(w2),
            profile: enc2::PROFILE.decode(w2),
            min_qp: enc2::MIN_QP.decode(w2),
            max_qp: enc2::MAX_QP.decode(w2),

            cpb_size: enc3::CPB_SIZE.decode(w3),
            initial_delay: enc4::INITIAL_DELAY.decode(w4),
            periodicity_idr: enc5::PERIODICITY_IDR.decode(w5),
        }
    }

    /// 编码为五个寄存器字 (端点侧使用)
    pub fn encode(&self) -> [u32; 5] {
        let mut w1 = 0;
        w1 = enc1::L2_CACHE.encode(w1, self.enable_l2cache as u32);
        w1 = enc1::LOW_BANDWIDTH.encode(w1, self.low_bandwidth as u32);
        w1 = enc1::FILLER_DATA.encode(w1, self.filler_data as u32);
        w1 = enc1::BITRATE.encode(w1, self.bitrate);
        w1 = enc1::GOP_LENGTH.encode(w1, self.gop_len);
        w1 = enc1::MAX_PICTURE_SIZE.encode(w1, self.max_picture_size as u32);

        let mut w2 = 0;
        w2 = enc2::B_FRAME.encode(w2, self.b_frame);
        w2 = enc2::SLICE.encode(w2, self.slice);
        w2 = enc2::QP_MODE.encode(w2, self.qp_mode);
        w2 = enc2::RC_MODE.encode(w2, self.rc_mode);
        w2 = enc2::ENC_TYPE.encode(w2, self.enc_type);
        w2 = enc2::GOP_MODE.encode(w2, self.gop_mode);
        w2 = enc2::PROFILE.encode(w2, self.profile);
        w2 = enc2::MIN_QP.encode(w2, self.min_qp);
        w2 = enc2::MAX_QP.encode(w2, self.max_qp);

        [
            w1,
            w2,
            enc3::CPB_SIZE.encode(0, self.cpb_size),
            enc4::INITIAL_DELAY.encode(0, self.initial_delay),
            enc5::PERIODICITY_IDR.encode(0, self.periodicity_idr),
        ]
    }
}

/// 原始分辨率
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, IntoBytes, Immutable, KnownLayout)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

const_assert_eq!(core::mem::size_of::<Resolution>(), 8);

impl Resolution {
    pub fn decode(word: u32) -> Self {
        Self {
            width: resolution::WIDTH.decode(word),
            height: resolution::HEIGHT.decode(word),
        }
    }

    pub fn encode(&self) -> u32 {
        resolution::HEIGHT.encode(resolution::WIDTH.encode(0, self.width), self.height)
    }
}

/// 用例模式寄存器的内容
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsecaseMode {
    pub mode: u32,
    pub format: u32,
    pub fps: u32,
}

impl UsecaseMode {
    pub fn decode(word: u32) -> Self {
        Self {
            mode: usecase::MODE.decode(word),
            format: usecase::FORMAT.decode(word),
            fps: usecase::FPS.decode(word),
        }
    }

    pub fn encode(&self) -> u32 {
        let word = usecase::MODE.encode(0, self.mode);
        let word = usecase::FORMAT.encode(word, self.format);
        usecase::FPS.encode(word, self.fps)
    }
}

/// 控制请求命令码
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum ControlRequest {
    GetFileLength = 0x0,
    GetEncParams = 0x1,
    SetReadOffset = 0x2,
    SetWriteOffset = 0x3,
    SetReadTransferDone = 0x5,
    ClrReadTransferDone = 0x6,
    SetWriteTransferDone = 0x7,
    ClrWriteTransferDone = 0x8,
    GetResolution = 0x9,
    GetMode = 0xa,
    GetFps = 0xb,
    GetFormat = 0xc,
}

/// 驱动配置
#[derive(Debug, Clone)]
pub struct PciepConfig {
    /// 设备类名，节点名为 `<name><minor>`
    pub name: &'static str,
    /// 次设备号
    pub minor: u32,
    /// 设备可见地址位宽
    pub dma_addr_bits: u32,
    /// 等待完成中断的超时，`None` 表示无限等待
    pub wait_timeout: Option<Duration>,
}

impl Default for PciepConfig {
    fn default() -> Self {
        Self {
            name: DRIVER_NAME,
            minor: 0,
            dma_addr_bits: 32,
            wait_timeout: None,
        }
    }
}
