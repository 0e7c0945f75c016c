//! 音频采样格式定义.

use std::fmt;

/// 音频采样格式
///
/// - 交错 (Interleaved): 所有声道的采样点交替排列, 如 LRLRLR...
/// - 平面 (Planar): 每个声道独立存储, 如 LLL...RRR...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SampleFormat {
    /// 未指定
    None,

    // ========================
    // 交错格式 (Interleaved)
    // ========================
    /// 无符号 8 位整数, 交错
    U8,
    /// 有符号 16 位整数, 交错
    S16,
    /// 有符号 32 位整数, 交错
    S32,
    /// 有符号 64 位整数, 交错
    S64,
    /// 32 位浮点, 交错
    F32,
    /// 64 位浮点, 交错
    F64,

    // ========================
    // 平面格式 (Planar)
    // ========================
    /// 无符号 8 位整数, 平面
    U8p,
    /// 有符号 16 位整数, 平面
    S16p,
    /// 有符号 32 位整数, 平面
    S32p,
    /// 有符号 64 位整数, 平面
    S64p,
    /// 32 位浮点, 平面
    F32p,
    /// 64 位浮点, 平面
    F64p,
}

impl SampleFormat {
    /// 每个采样点占用的字节数
    pub const fn bytes_per_sample(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::U8 | Self::U8p => 1,
            Self::S16 | Self::S16p => 2,
            Self::S32 | Self::S32p | Self::F32 | Self::F32p => 4,
            Self::S64 | Self::S64p | Self::F64 | Self::F64p => 8,
        }
    }

    /// 是否为平面格式
    pub const fn is_planar(&self) -> bool {
        matches!(
            self,
            Self::U8p | Self::S16p | Self::S32p | Self::S64p | Self::F32p | Self::F64p
        )
    }

    /// 获取对应的交错格式
    pub const fn to_interleaved(&self) -> Self {
        match self {
            Self::U8p => Self::U8,
            Self::S16p => Self::S16,
            Self::S32p => Self::S32,
            Self::S64p => Self::S64,
            Self::F32p => Self::F32,
            Self::F64p => Self::F64,
            other => *other,
        }
    }

    /// 输出设备可接受的交错格式
    ///
    /// 音频设备只支持 u8/s16/s32/f32 交错采样, 其余格式映射到精度最接近的一种.
    /// 返回 `None` 表示无法映射.
    pub const fn sink_format(&self) -> Option<Self> {
        match self {
            Self::U8 | Self::S16 | Self::S32 | Self::F32 => Some(*self),
            Self::F64 | Self::F32p | Self::F64p => Some(Self::F32),
            Self::U8p => Some(Self::U8),
            Self::S16p => Some(Self::S16),
            Self::S32p | Self::S64 | Self::S64p => Some(Self::S32),
            Self::None => None,
        }
    }

    /// 该格式下表示静音的字节值
    pub const fn silence_byte(&self) -> u8 {
        match self {
            Self::U8 | Self::U8p => 0x80,
            _ => 0,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::U8 => "u8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::S64 => "s64",
            Self::F32 => "flt",
            Self::F64 => "dbl",
            Self::U8p => "u8p",
            Self::S16p => "s16p",
            Self::S32p => "s32p",
            Self::S64p => "s64p",
            Self::F32p => "fltp",
            Self::F64p => "dblp",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fmt = match s {
            "u8" => Self::U8,
            "s16" => Self::S16,
            "s32" => Self::S32,
            "s64" => Self::S64,
            "flt" | "f32" => Self::F32,
            "dbl" | "f64" => Self::F64,
            "u8p" => Self::U8p,
            "s16p" => Self::S16p,
            "s32p" => Self::S32p,
            "s64p" => Self::S64p,
            "fltp" | "f32p" => Self::F32p,
            "dblp" | "f64p" => Self::F64p,
            other => return Err(format!("未知采样格式: {other}")),
        };
        Ok(fmt)
    }
}
