//! 视频输出表面与输出后端接口.

use serde::{Deserialize, Serialize};
use tongbu_core::PlayerResult;

use crate::frame::VideoFrame;
use crate::sink::{AudioDevice, AudioPuller, AudioSpec};

/// 显示刷新率未知时使用的默认值 (Hz)
pub const DEFAULT_REFRESH_RATE: u32 = 60;

/// 调用方提供的外部窗口句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowHandle(pub u64);

/// 渲染目标矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// 铺满 `width` x `height` 的矩形
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// 窗口事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// 用户关闭窗口
    Close,
    /// 窗口需要重绘
    Exposed,
    /// 窗口尺寸变化
    Resized { width: u32, height: u32 },
}

/// 创建视频表面的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceRequest {
    /// 视频宽度
    pub width: u32,
    /// 视频高度
    pub height: u32,
    /// 是否允许调整窗口大小
    pub resize: bool,
    /// 挂接到外部窗口, `None` 表示由后端创建窗口
    pub window_handle: Option<WindowHandle>,
    /// 窗口标题
    pub title: String,
}

/// 视频输出表面
///
/// 只在事件线程上使用.
pub trait VideoSurface: Send {
    /// 当前绘制区域尺寸
    fn size(&self) -> (u32, u32);

    /// 显示刷新率 (Hz), 0 表示未知
    fn refresh_rate(&self) -> u32;

    /// 把一帧绘制到 `rect`
    fn blit(&mut self, frame: &VideoFrame, rect: Rect) -> PlayerResult<()>;

    /// 呈现已绘制的内容
    fn present(&mut self) -> PlayerResult<()>;

    /// 非阻塞地取一个窗口事件
    fn poll_event(&mut self) -> Option<WindowEvent>;
}

/// 输出后端: 打开音频设备并创建视频表面
pub trait OutputBackend {
    /// 打开音频设备
    ///
    /// 返回设备句柄和实际参数. 设备创建后处于暂停状态, 采样格式必须与 `desired` 一致.
    fn open_audio(
        &mut self,
        desired: &AudioSpec,
        puller: AudioPuller,
    ) -> PlayerResult<(Box<dyn AudioDevice>, AudioSpec)>;

    /// 创建视频表面
    fn create_surface(&mut self, request: &SurfaceRequest) -> PlayerResult<Box<dyn VideoSurface>>;
}

/// 显示刷新间隔 (微秒), 刷新率未知时按 60Hz
pub fn display_frame_us(refresh_rate: u32) -> i64 {
    let hz = if refresh_rate == 0 {
        DEFAULT_REFRESH_RATE
    } else {
        refresh_rate
    };
    1_000_000 / i64::from(hz)
}
