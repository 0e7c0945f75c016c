//! 时间戳与时间基换算.
//!
//! 引擎内部的所有时钟字段都以微秒 ([`TIME_BASE`]) 为单位.

use crate::rational::{Rational, Rounding, div_round};
use std::fmt;

/// 表示"未定义"的时间戳值
pub const NOPTS_VALUE: i64 = i64::MIN;

/// 全局时间基: 微秒
pub const TIME_BASE: Rational = Rational::MICRO;

/// 将 `value` 从时间基 `from` 换算到 `to`, 按 `rounding` 舍入
///
/// `NOPTS_VALUE` 与 `i64::MAX` 原样透传; 任一时间基无效时返回 `NOPTS_VALUE`.
/// 结果超出 i64 范围时饱和.
pub fn rescale_rnd(value: i64, from: Rational, to: Rational, rounding: Rounding) -> i64 {
    if value == NOPTS_VALUE || value == i64::MAX {
        return value;
    }
    if !from.is_valid() || !to.is_valid() {
        return NOPTS_VALUE;
    }
    // value * from.num / from.den * to.den / to.num
    let num = i128::from(value) * i128::from(from.num) * i128::from(to.den);
    let den = i128::from(from.den) * i128::from(to.num);
    let q = div_round(num, den, rounding);
    q.clamp(i128::from(i64::MIN + 1), i128::from(i64::MAX)) as i64
}

/// 四舍五入换算
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    rescale_rnd(value, from, to, Rounding::NearInf)
}

/// 时间戳
///
/// 包含一个整数值和对应的时间基.
/// 实际时间 (秒) = pts * time_base.num / time_base.den.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// 时间戳值, `NOPTS_VALUE` 表示未定义
    pub pts: i64,
    /// 时间基
    pub time_base: Rational,
}

impl Timestamp {
    /// 创建新的时间戳
    pub const fn new(pts: i64, time_base: Rational) -> Self {
        Self { pts, time_base }
    }

    /// 创建未定义的时间戳
    pub const fn none() -> Self {
        Self {
            pts: NOPTS_VALUE,
            time_base: Rational::UNDEFINED,
        }
    }

    /// 判断时间戳是否有效
    pub const fn is_valid(&self) -> bool {
        self.pts != NOPTS_VALUE && self.time_base.is_valid()
    }

    /// 换算为全局时间基 (微秒), 无效时返回 `NOPTS_VALUE`
    pub fn to_micros(&self) -> i64 {
        if !self.is_valid() {
            return NOPTS_VALUE;
        }
        rescale(self.pts, self.time_base, TIME_BASE)
    }

    /// 换算为秒, 无效时返回 `f64::NAN`
    pub fn to_seconds(&self) -> f64 {
        if !self.is_valid() {
            return f64::NAN;
        }
        self.pts as f64 * self.time_base.to_f64()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            write!(f, "NOPTS")
        } else {
            write!(f, "{:.6}s", self.to_seconds())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_采样数到微秒() {
        // 1024 个采样 @ 48kHz = 21333.33us
        let us = rescale(1024, Rational::per_sample(48000), TIME_BASE);
        assert_eq!(us, 21333);
        let up = rescale_rnd(1024, Rational::per_sample(48000), TIME_BASE, Rounding::Up);
        assert_eq!(up, 21334);
    }

    #[test]
    fn test_rescale_采样率换算向上取整() {
        // 1024 @ 44100 -> 48000: 1114.55 -> 1115
        let n = rescale_rnd(
            1024,
            Rational::per_sample(44100),
            Rational::per_sample(48000),
            Rounding::Up,
        );
        assert_eq!(n, 1115);
    }

    #[test]
    fn test_rescale_透传极值() {
        assert_eq!(rescale(NOPTS_VALUE, Rational::MILLI, TIME_BASE), NOPTS_VALUE);
        assert_eq!(rescale(i64::MAX, Rational::MILLI, TIME_BASE), i64::MAX);
        assert_eq!(rescale(5, Rational::UNDEFINED, TIME_BASE), NOPTS_VALUE);
    }

    #[test]
    fn test_rescale_饱和() {
        let v = rescale(i64::MAX - 1, Rational::new(1, 1), TIME_BASE);
        assert_eq!(v, i64::MAX);
    }

    #[test]
    fn test_timestamp_转换为微秒() {
        let ts = Timestamp::new(90000, Rational::new(1, 90000));
        assert_eq!(ts.to_micros(), 1_000_000);
        assert!((ts.to_seconds() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_timestamp_无效值() {
        let ts = Timestamp::none();
        assert!(!ts.is_valid());
        assert_eq!(ts.to_micros(), NOPTS_VALUE);
        assert_eq!(ts.to_string(), "NOPTS");
    }
}
