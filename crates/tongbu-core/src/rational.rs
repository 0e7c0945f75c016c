//! 有理数类型, 用于时间基 (time_base) 与帧率.
//!
//! 时间换算全部在 i128 上做交叉乘法, 只在最后一步按指定方式舍入.

use std::fmt;

/// 有理数, 由分子和分母组成
///
/// 例如: 时间基 1/48000 表示按采样计数, 帧率 30000/1001 表示 29.97fps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// 分子
    pub num: i32,
    /// 分母
    pub den: i32,
}

/// 整数除法的舍入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rounding {
    /// 四舍五入, 恰好一半时远离零
    #[default]
    NearInf,
    /// 向正无穷
    Up,
    /// 向负无穷
    Down,
    /// 向零
    Zero,
    /// 远离零
    Inf,
}

impl Rational {
    /// 创建新的有理数
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 零值
    pub const ZERO: Self = Self { num: 0, den: 1 };

    /// 未定义 (分母为 0)
    pub const UNDEFINED: Self = Self { num: 0, den: 0 };

    /// 微秒 (1/1_000_000)
    pub const MICRO: Self = Self {
        num: 1,
        den: 1_000_000,
    };

    /// 毫秒 (1/1_000)
    pub const MILLI: Self = Self { num: 1, den: 1_000 };

    /// 以采样率为分母的时间基 (1/rate)
    pub const fn per_sample(rate: u32) -> Self {
        Self {
            num: 1,
            den: rate as i32,
        }
    }

    /// 判断是否有效 (分子分母都不为 0)
    pub const fn is_valid(&self) -> bool {
        self.den != 0 && self.num != 0
    }

    /// 转换为 f64 浮点数
    ///
    /// 分母为 0 时返回 `f64::NAN`.
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            return f64::NAN;
        }
        f64::from(self.num) / f64::from(self.den)
    }

    /// 约分, 并保证分母为正
    pub fn reduce(self) -> Self {
        if self.den == 0 {
            return self;
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        if g == 0 {
            return self;
        }
        let g = g as i32;
        let sign = if self.den < 0 { -1 } else { 1 };
        Self {
            num: sign * self.num / g,
            den: sign * self.den / g,
        }
    }

    /// 求倒数
    pub const fn invert(self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self { num, den }
    }
}

/// 按舍入方式计算 `n / d`
///
/// `d` 不能为 0.
pub(crate) fn div_round(n: i128, d: i128, rounding: Rounding) -> i128 {
    let (n, d) = if d < 0 { (-n, -d) } else { (n, d) };
    let floor = n.div_euclid(d);
    let rem = n.rem_euclid(d);
    if rem == 0 {
        return floor;
    }
    match rounding {
        Rounding::Down => floor,
        Rounding::Up => floor + 1,
        Rounding::Zero => {
            if n < 0 {
                floor + 1
            } else {
                floor
            }
        }
        Rounding::Inf => {
            if n < 0 {
                floor
            } else {
                floor + 1
            }
        }
        Rounding::NearInf => {
            let twice = rem * 2;
            if twice > d || (twice == d && n > 0) {
                floor + 1
            } else {
                floor
            }
        }
    }
}

/// 求最大公约数 (欧几里得算法)
fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_reduce() {
        assert_eq!(Rational::new(30, 60).reduce(), Rational::new(1, 2));
        assert_eq!(Rational::new(2, -4).reduce(), Rational::new(-1, 2));
    }

    #[test]
    fn test_rational_invalid_value() {
        let r = Rational::UNDEFINED;
        assert!(!r.is_valid());
        assert!(r.to_f64().is_nan());
    }

    #[test]
    fn test_rational_display() {
        assert_eq!(format!("{}", Rational::new(30000, 1001)), "30000/1001");
    }

    #[test]
    fn test_rational_per_sample() {
        assert_eq!(Rational::per_sample(48000), Rational::new(1, 48000));
        assert_eq!(Rational::new(1, 25).invert(), Rational::new(25, 1));
    }

    #[test]
    fn test_div_round_正数() {
        assert_eq!(div_round(7, 2, Rounding::NearInf), 4);
        assert_eq!(div_round(7, 2, Rounding::Down), 3);
        assert_eq!(div_round(7, 2, Rounding::Up), 4);
        assert_eq!(div_round(7, 2, Rounding::Zero), 3);
        assert_eq!(div_round(7, 2, Rounding::Inf), 4);
        assert_eq!(div_round(10, 3, Rounding::NearInf), 3);
        assert_eq!(div_round(8, 2, Rounding::Up), 4);
    }

    #[test]
    fn test_div_round_负数() {
        assert_eq!(div_round(-7, 2, Rounding::NearInf), -4);
        assert_eq!(div_round(-7, 2, Rounding::Down), -4);
        assert_eq!(div_round(-7, 2, Rounding::Up), -3);
        assert_eq!(div_round(-7, 2, Rounding::Zero), -3);
        assert_eq!(div_round(-7, 2, Rounding::Inf), -4);
        assert_eq!(div_round(7, -2, Rounding::Zero), -3);
    }
}
