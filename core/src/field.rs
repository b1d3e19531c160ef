//! 位域编解码
//!
//! 配置寄存器把多个逻辑值打包进一个 32 位字。每个字段由 (shift, width)
//! 描述，所有表都集中定义在这里，编解码只通过 [`BitField`] 完成。

/// 32 位寄存器字中的一个位域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    /// 字段名 (用于日志和审计)
    pub name: &'static str,
    /// 最低位位置
    pub shift: u32,
    /// 位宽
    pub width: u32,
}

impl BitField {
    pub const fn new(name: &'static str, shift: u32, width: u32) -> Self {
        assert!(width > 0 && shift + width <= 32);
        Self { name, shift, width }
    }

    /// 未移位的掩码
    #[inline]
    pub const fn mask(&self) -> u32 {
        if self.width == 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// 移位后的掩码
    #[inline]
    pub const fn mask_shifted(&self) -> u32 {
        self.mask() << self.shift
    }

    /// `field = (word >> shift) & mask`
    #[inline]
    pub const fn decode(&self, word: u32) -> u32 {
        (word >> self.shift) & self.mask()
    }

    /// 解码单比特字段
    #[inline]
    pub const fn decode_bool(&self, word: u32) -> bool {
        self.decode(word) != 0
    }

    /// 替换 `word` 中该字段的值，其他位保持不变
    #[inline]
    pub const fn encode(&self, word: u32, value: u32) -> u32 {
        (word & !self.mask_shifted()) | ((value & self.mask()) << self.shift)
    }

    /// 字段能表示的最大值
    #[inline]
    pub const fn max_value(&self) -> u32 {
        self.mask()
    }
}

/// 同一个寄存器字中的字段集合
#[derive(Debug, Clone, Copy)]
pub struct FieldTable {
    pub name: &'static str,
    pub fields: &'static [BitField],
}

impl FieldTable {
    /// 检查表内字段互不重叠
    pub const fn is_disjoint(&self) -> bool {
        let mut used = 0u32;
        let mut i = 0;
        while i < self.fields.len() {
            let m = self.fields[i].mask_shifted();
            if used & m != 0 {
                return false;
            }
            used |= m;
            i += 1;
        }
        true
    }
}

/// 缓冲区就绪寄存器: bit0 为就绪标志, bits[16:32) 为字节偏移的高 16 位
pub mod ready {
    use super::{BitField, FieldTable};

    pub const FLAG: BitField = BitField::new("ready", 0, 1);
    pub const OFFSET_HIGH: BitField = BitField::new("offset_high", 16, 16);

    pub const TABLE: FieldTable = FieldTable {
        name: "buffer_ready",
        fields: &[FLAG, OFFSET_HIGH],
    };

    /// 把 32 位字节偏移的 bits[16:32) 装入就绪寄存器的高半字
    #[inline]
    pub const fn pack_offset_high(word: u32, offset: u64) -> u32 {
        OFFSET_HIGH.encode(word, (offset >> 16) as u32)
    }

    /// 清除就绪寄存器中的偏移高位
    #[inline]
    pub const fn clear_offset_high(word: u32) -> u32 {
        OFFSET_HIGH.encode(word, 0)
    }
}

/// 原始分辨率寄存器
pub mod resolution {
    use super::{BitField, FieldTable};

    pub const WIDTH: BitField = BitField::new("width", 0, 16);
    pub const HEIGHT: BitField = BitField::new("height", 16, 16);

    pub const TABLE: FieldTable = FieldTable {
        name: "resolution",
        fields: &[WIDTH, HEIGHT],
    };
}

/// 用例模式寄存器
pub mod usecase {
    use super::{BitField, FieldTable};

    pub const MODE: BitField = BitField::new("mode", 0, 2);
    pub const FORMAT: BitField = BitField::new("format", 2, 3);
    pub const FPS: BitField = BitField::new("fps", 5, 10);

    pub const TABLE: FieldTable = FieldTable {
        name: "usecase_mode",
        fields: &[MODE, FORMAT, FPS],
    };
}

/// 编码参数 1: 缓存/带宽/填充/码率/GOP 长度/最大图像尺寸
pub mod enc1 {
    use super::{BitField, FieldTable};

    pub const L2_CACHE: BitField = BitField::new("enable_l2cache", 0, 1);
    pub const LOW_BANDWIDTH: BitField = BitField::new("low_bandwidth", 1, 1);
    pub const FILLER_DATA: BitField = BitField::new("filler_data", 2, 1);
    pub const BITRATE: BitField = BitField::new("bitrate", 4, 16);
    pub const GOP_LENGTH: BitField = BitField::new("gop_len", 20, 10);
    pub const MAX_PICTURE_SIZE: BitField = BitField::new("max_picture_size", 30, 1);

    pub const TABLE: FieldTable = FieldTable {
        name: "enc_params_1",
        fields: &[
            L2_CACHE,
            LOW_BANDWIDTH,
            FILLER_DATA,
            BITRATE,
            GOP_LENGTH,
            MAX_PICTURE_SIZE,
        ],
    };
}

/// 编码参数 2: B 帧/slice/QP 模式/码控模式/编码类型/GOP 模式/profile/QP 范围
pub mod enc2 {
    use super::{BitField, FieldTable};

    pub const B_FRAME: BitField = BitField::new("b_frame", 0, 2);
    pub const SLICE: BitField = BitField::new("slice", 3, 6);
    pub const QP_MODE: BitField = BitField::new("qp_mode", 9, 2);
    pub const RC_MODE: BitField = BitField::new("rc_mode", 11, 2);
    pub const ENC_TYPE: BitField = BitField::new("enc_type", 13, 2);
    pub const GOP_MODE: BitField = BitField::new("gop_mode", 15, 3);
    pub const PROFILE: BitField = BitField::new("profile", 18, 2);
    pub const MIN_QP: BitField = BitField::new("min_qp", 20, 6);
    pub const MAX_QP: BitField = BitField::new("max_qp", 26, 6);

    pub const TABLE: FieldTable = FieldTable {
        name: "enc_params_2",
        fields: &[
            B_FRAME, SLICE, QP_MODE, RC_MODE, ENC_TYPE, GOP_MODE, PROFILE, MIN_QP, MAX_QP,
        ],
    };
}

/// 编码参数 3: CPB 大小
pub mod enc3 {
    use super::{BitField, FieldTable};

    pub const CPB_SIZE: BitField = BitField::new("cpb_size", 0, 16);

    pub const TABLE: FieldTable = FieldTable {
        name: "enc_params_3",
        fields: &[CPB_SIZE],
    };
}

/// 编码参数 4: 初始延迟
pub mod enc4 {
    use super::{BitField, FieldTable};

    pub const INITIAL_DELAY: BitField = BitField::new("initial_delay", 0, 16);

    pub const TABLE: FieldTable = FieldTable {
        name: "enc_params_4",
        fields: &[INITIAL_DELAY],
    };
}

/// 编码参数 5: IDR 周期
pub mod enc5 {
    use super::{BitField, FieldTable};

    pub const PERIODICITY_IDR: BitField = BitField::new("periodicity_idr", 0, 16);

    pub const TABLE: FieldTable = FieldTable {
        name: "enc_params_5",
        fields: &[PERIODICITY_IDR],
    };
}

/// 所有字段表
pub const ALL_TABLES: [FieldTable; 8] = [
    ready::TABLE,
    resolution::TABLE,
    usecase::TABLE,
    enc1::TABLE,
    enc2::TABLE,
    enc3::TABLE,
    enc4::TABLE,
    enc5::TABLE,
];
