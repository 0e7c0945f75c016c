//! 像素格式定义.
//!
//! 引擎不做像素格式转换, 只需要知道平面数量和每平面的尺寸, 用于分配与校验帧数据.

use std::fmt;

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PixelFormat {
    /// 未指定
    None,
    /// YUV 4:2:0 平面格式, 8 位
    Yuv420p,
    /// NV12: Y 平面 + UV 交错, 4:2:0, 8 位
    Nv12,
    /// RGB 各 8 位, 打包
    Rgb24,
    /// RGBA 各 8 位, 打包
    Rgba,
}

impl PixelFormat {
    /// 平面数量
    pub const fn plane_count(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Yuv420p => 3,
            Self::Nv12 => 2,
            Self::Rgb24 | Self::Rgba => 1,
        }
    }

    /// 指定平面每行的字节数与行数
    pub const fn plane_size(&self, plane: usize, width: u32, height: u32) -> Option<(usize, usize)> {
        let w = width as usize;
        let h = height as usize;
        let half_w = w.div_ceil(2);
        let half_h = h.div_ceil(2);
        match (self, plane) {
            (Self::Yuv420p, 0) | (Self::Nv12, 0) => Some((w, h)),
            (Self::Yuv420p, 1) | (Self::Yuv420p, 2) => Some((half_w, half_h)),
            (Self::Nv12, 1) => Some((half_w * 2, half_h)),
            (Self::Rgb24, 0) => Some((w * 3, h)),
            (Self::Rgba, 0) => Some((w * 4, h)),
            _ => None,
        }
    }

    /// 一帧图像的总字节数
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        (0..self.plane_count() as usize)
            .filter_map(|p| self.plane_size(p, width, height))
            .map(|(line, rows)| line * rows)
            .sum()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Yuv420p => "yuv420p",
            Self::Nv12 => "nv12",
            Self::Rgb24 => "rgb24",
            Self::Rgba => "rgba",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_帧大小() {
        assert_eq!(PixelFormat::Yuv420p.frame_size(64, 48), 64 * 48 * 3 / 2);
        assert_eq!(PixelFormat::Nv12.frame_size(64, 48), 64 * 48 * 3 / 2);
        assert_eq!(PixelFormat::Rgba.frame_size(2, 2), 16);
        // 奇数尺寸的色度平面向上取整
        assert_eq!(PixelFormat::Yuv420p.plane_size(1, 5, 5), Some((3, 3)));
        assert_eq!(PixelFormat::Rgb24.plane_size(1, 5, 5), None);
    }
}
