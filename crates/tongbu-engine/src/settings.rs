//! 会话设置.

use serde::{Deserialize, Serialize};

use crate::surface::WindowHandle;

/// 会话设置
///
/// 所有字段都有默认值, JSON 中缺省的字段取默认值.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 允许调整窗口大小, 视频随窗口缩放
    pub resize: bool,
    /// 音频缓冲目标时长 (毫秒)
    pub audio_buffer_ms: u32,
    /// 视频缓冲时长 (毫秒), 决定视频队列容量
    pub video_buffer_ms: u32,
    /// 挂接到外部窗口
    pub window_handle: Option<WindowHandle>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resize: true,
            audio_buffer_ms: 500,
            video_buffer_ms: 500,
            window_handle: None,
        }
    }
}

impl Settings {
    /// 视频队列容量: 能容纳 `video_buffer_ms` 的帧数, 至少 2 帧
    pub fn video_queue_capacity(&self, frame_interval_us: i64) -> usize {
        let tft = frame_interval_us.max(1);
        let frames = (i64::from(self.video_buffer_ms) * 1000 + tft - 1) / tft;
        frames.max(2) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_默认值() {
        let s = Settings::default();
        assert!(s.resize);
        assert_eq!(s.audio_buffer_ms, 500);
        assert_eq!(s.video_buffer_ms, 500);
        assert!(s.window_handle.is_none());
    }

    #[test]
    fn test_json_缺省字段() {
        let s: Settings = serde_json::from_str(r#"{"audio_buffer_ms": 200, "window_handle": 7}"#).unwrap();
        assert_eq!(s.audio_buffer_ms, 200);
        assert_eq!(s.video_buffer_ms, 500);
        assert_eq!(s.window_handle, Some(WindowHandle(7)));
        assert!(s.resize);
    }

    #[test]
    fn test_视频队列容量() {
        let s = Settings::default();
        assert_eq!(s.video_queue_capacity(40_000), 13);
        assert_eq!(s.video_queue_capacity(1_000_000), 2);
    }
}
