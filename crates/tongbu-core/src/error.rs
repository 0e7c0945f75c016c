//! 统一错误类型定义.
//!
//! 会话创建、解码和输出各阶段共用的错误类型. 每个错误都有一个稳定的整数错误码,
//! 供需要跨语言边界传递错误的调用方使用.

use thiserror::Error;

/// 无错误时的错误码
pub const ERR_OK: i32 = 0;

/// 播放引擎统一错误类型
///
/// 负载均为字符串, 以便错误可以克隆后记录在会话上供外部查询.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    /// 必需参数缺失 (如空的媒体源标识)
    #[error("空参数: {0}")]
    NullArgument(String),

    /// 音频设备或窗口创建失败
    #[error("输出设备错误: {0}")]
    OutputDevice(String),

    /// 内存分配失败
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// 没有可用的音视频流或解码器
    #[error("未找到流或解码器: {0}")]
    NoStreamOrDecoder(String),

    /// 解码器输出的采样格式无法映射到输出设备支持的格式
    #[error("不支持的音频采样格式: {0}")]
    UnsupportedSampleFormat(String),

    /// 获取锁失败
    #[error("获取锁失败: {0}")]
    LockAcquisitionFailed(String),

    /// 后台线程启动失败
    #[error("创建线程失败: {0}")]
    ThreadStartFailed(String),

    /// 解码器透传错误
    #[error("解码错误: {0}")]
    Decode(String),

    /// 重采样器透传错误
    #[error("重采样错误: {0}")]
    Resample(String),
}

impl PlayerError {
    /// 稳定的整数错误码
    ///
    /// 0 保留给"无错误", 透传错误使用 9 和 10.
    pub const fn code(&self) -> i32 {
        match self {
            Self::NullArgument(_) => 1,
            Self::OutputDevice(_) => 2,
            Self::OutOfMemory(_) => 3,
            Self::NoStreamOrDecoder(_) => 4,
            Self::UnsupportedSampleFormat(_) => 5,
            Self::LockAcquisitionFailed(_) => 7,
            Self::ThreadStartFailed(_) => 8,
            Self::Decode(_) => 9,
            Self::Resample(_) => 10,
        }
    }

    /// 根据错误码获取通用描述
    pub const fn message_for_code(code: i32) -> &'static str {
        match code {
            ERR_OK => "无错误",
            1 => "空参数",
            2 => "输出设备错误",
            3 => "内存分配失败",
            4 => "未找到流或解码器",
            5 => "未知的音频采样格式",
            6 => "创建锁失败",
            7 => "等待锁失败",
            8 => "创建线程失败",
            9 => "解码错误",
            10 => "重采样错误",
            _ => "未知错误",
        }
    }
}

/// 播放引擎统一 Result 类型
pub type PlayerResult<T> = Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_与描述一致() {
        let err = PlayerError::NoStreamOrDecoder("testsrc".into());
        assert_eq!(err.code(), 4);
        assert_eq!(PlayerError::message_for_code(err.code()), "未找到流或解码器");
    }

    #[test]
    fn test_error_未知错误码() {
        assert_eq!(PlayerError::message_for_code(ERR_OK), "无错误");
        assert_eq!(PlayerError::message_for_code(42), "未知错误");
        assert_eq!(PlayerError::message_for_code(-1), "未知错误");
    }

    #[test]
    fn test_error_display() {
        let err = PlayerError::ThreadStartFailed("decode".into());
        assert_eq!(err.to_string(), "创建线程失败: decode");
    }
}
