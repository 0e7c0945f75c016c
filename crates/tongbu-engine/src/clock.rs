//! 主时钟.
//!
//! 以音频回调的消费进度为主时钟: 当前播放位置 = 音频缓冲区头部时间 + 上次消费后经过的墙钟时间.
//! 外推量不超过上次消费的时长, 音频断流时时钟随之停住; 音频流结束后不再限制, 按墙钟继续走.
//! 没有音频流时退回墙钟计时. 暂停期间时钟冻结, 不做外推.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Instant;

use tongbu_core::NOPTS_VALUE;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// 进程内单调墙钟 (微秒)
pub fn wall_clock_us() -> i64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
}

/// 主时钟 (线程安全)
#[derive(Debug)]
pub struct MasterClock {
    /// 墙钟模式的起点: 位置 = 墙钟 - origin
    origin_us: AtomicI64,
    paused: AtomicBool,
    /// 最近一次暂停的墙钟时间
    paused_at_us: AtomicI64,
    /// 最近一次恢复播放的墙钟时间, 音频外推不能早于这一刻
    resumed_at_us: AtomicI64,
}

impl Default for MasterClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterClock {
    /// 创建处于暂停状态的时钟
    pub fn new() -> Self {
        Self {
            origin_us: AtomicI64::new(NOPTS_VALUE),
            paused: AtomicBool::new(true),
            paused_at_us: AtomicI64::new(0),
            resumed_at_us: AtomicI64::new(NOPTS_VALUE),
        }
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// 设置暂停状态
    pub fn set_paused(&self, paused: bool, now_us: i64) {
        let was = self.paused.swap(paused, Ordering::AcqRel);
        if was == paused {
            return;
        }
        if paused {
            self.paused_at_us.store(now_us, Ordering::Release);
        } else {
            self.resumed_at_us.store(now_us, Ordering::Release);
            let origin = self.origin_us.load(Ordering::Acquire);
            if origin != NOPTS_VALUE {
                // 墙钟模式跳过暂停的时长
                let paused_for = now_us - self.paused_at_us.load(Ordering::Acquire);
                self.origin_us.store(origin + paused_for, Ordering::Release);
            }
        }
    }

    /// 以 `position_us` 作为当前位置启动墙钟模式, 已启动时忽略
    pub fn start_wall(&self, position_us: i64, now_us: i64) {
        let _ = self.origin_us.compare_exchange(
            NOPTS_VALUE,
            now_us - position_us,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// 墙钟模式是否已启动
    pub fn wall_started(&self) -> bool {
        self.origin_us.load(Ordering::Acquire) != NOPTS_VALUE
    }

    /// 墙钟模式的当前位置, 未启动时返回 `None`
    pub fn wall_position(&self, now_us: i64) -> Option<i64> {
        let origin = self.origin_us.load(Ordering::Acquire);
        if origin == NOPTS_VALUE {
            return None;
        }
        let at = if self.is_paused() {
            self.paused_at_us.load(Ordering::Acquire)
        } else {
            now_us
        };
        Some(at - origin)
    }

    /// 音频模式的当前位置
    ///
    /// - `audio_pts`: 音频缓冲区头部时间
    /// - `updated_at`: 上次消费的墙钟时间, 尚未消费时不外推
    /// - `limit_us`: 外推上限, `None` 表示不限制
    pub fn audio_position(
        &self,
        audio_pts: i64,
        updated_at: Option<i64>,
        limit_us: Option<i64>,
        now_us: i64,
    ) -> i64 {
        if self.is_paused() {
            return audio_pts;
        }
        match updated_at {
            Some(at) => {
                let since = at.max(self.resumed_at_us.load(Ordering::Acquire));
                let ahead = (now_us - since).max(0);
                audio_pts + limit_us.map_or(ahead, |limit| ahead.min(limit.max(0)))
            }
            None => audio_pts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_clock_单调() {
        let a = wall_clock_us();
        let b = wall_clock_us();
        assert!(b >= a);
    }

    #[test]
    fn test_audio_position_外推() {
        let clock = MasterClock::new();
        clock.set_paused(false, 0);
        assert_eq!(clock.audio_position(1_000, Some(100), None, 600), 1_500);
        assert_eq!(clock.audio_position(1_000, Some(100), Some(10_000), 600), 1_500);
        // 尚未消费过: 不外推
        assert_eq!(clock.audio_position(1_000, None, None, 600), 1_000);
    }

    #[test]
    fn test_audio_position_断流时停在上次消费末尾() {
        let clock = MasterClock::new();
        clock.set_paused(false, 0);
        // 0 时刻取走 10ms 后断流, 500ms 后时钟停在 20ms
        assert_eq!(
            clock.audio_position(10_000, Some(0), Some(10_000), 500_000),
            20_000
        );
        // 恢复后下一次消费不会让时钟倒退
        let resumed = clock.audio_position(20_000, Some(510_000), Some(10_000), 510_001);
        assert!(resumed >= 20_000);
        // 音频流结束后不再限制
        assert_eq!(
            clock.audio_position(10_000, Some(0), None, 500_000),
            510_000
        );
    }

    #[test]
    fn test_audio_position_暂停冻结() {
        let clock = MasterClock::new();
        clock.set_paused(false, 0);
        clock.set_paused(true, 500);
        assert_eq!(clock.audio_position(1_000, Some(100), None, 900), 1_000);
        // 恢复后从恢复时刻开始外推, 不计入暂停时长
        clock.set_paused(false, 10_000);
        assert_eq!(clock.audio_position(1_000, Some(100), None, 10_200), 1_200);
    }

    #[test]
    fn test_wall_position_跳过暂停() {
        let clock = MasterClock::new();
        assert_eq!(clock.wall_position(0), None);
        clock.set_paused(false, 1_000);
        clock.start_wall(0, 1_000);
        assert_eq!(clock.wall_position(3_000), Some(2_000));
        clock.set_paused(true, 3_000);
        assert_eq!(clock.wall_position(9_000), Some(2_000));
        clock.set_paused(false, 9_000);
        assert_eq!(clock.wall_position(10_000), Some(3_000));
        // 重复启动不改变起点
        clock.start_wall(0, 10_000);
        assert_eq!(clock.wall_position(10_000), Some(3_000));
    }
}
