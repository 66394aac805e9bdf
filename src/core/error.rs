use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析失败: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("无法打开媒体源: {0}")]
    OpenError(String),

    #[error("媒体源中没有可解码的音视频流")]
    NoDecodableStream,

    #[error("无法打开{kind}解码器: {reason}")]
    CodecOpen { kind: &'static str, reason: String },

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("硬件帧传输失败: {0}")]
    TransferError(String),

    #[error("图像缩放失败: {0}")]
    ScaleError(String),

    #[error("音频重采样失败: {0}")]
    ResampleError(String),

    #[error("无效的目标尺寸: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("线程异常退出: {0}")]
    ThreadPanicked(&'static str),
}

impl PlayerError {
    /// 是否属于打开阶段的致命错误（解码不会启动）
    pub fn is_open_error(&self) -> bool {
        matches!(
            self,
            PlayerError::OpenError(_) | PlayerError::NoDecodableStream | PlayerError::CodecOpen { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_classification() {
        assert!(PlayerError::NoDecodableStream.is_open_error());
        assert!(PlayerError::OpenError("x".into()).is_open_error());
        assert!(PlayerError::CodecOpen { kind: "视频", reason: "x".into() }.is_open_error());
        assert!(!PlayerError::DecodeError("x".into()).is_open_error());
        assert!(!PlayerError::TransferError("x".into()).is_open_error());
    }
}
