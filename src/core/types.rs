use ffmpeg_next::util::{format, frame};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 媒体源类型
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// 网络流 URL
    NetworkStream {
        url: String,
        protocol: StreamProtocol,
    },
}

impl MediaSource {
    /// 从 URL 字符串解析媒体源
    pub fn from_url(url: &str) -> Self {
        let protocol = if url.starts_with("rtsp://") {
            Some(StreamProtocol::RTSP)
        } else if url.starts_with("rtmp://") {
            Some(StreamProtocol::RTMP)
        } else if url.ends_with(".m3u8") || url.contains("/hls/") {
            Some(StreamProtocol::HLS)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Some(StreamProtocol::HTTP)
        } else {
            None
        };

        match protocol {
            Some(protocol) => MediaSource::NetworkStream {
                url: url.to_string(),
                protocol,
            },
            // 默认当作本地文件
            None => MediaSource::LocalFile(PathBuf::from(url)),
        }
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        matches!(self, MediaSource::NetworkStream { .. })
    }

    /// 交给 FFmpeg 打开的路径/URL
    pub fn location(&self) -> String {
        match self {
            MediaSource::LocalFile(path) => path.to_string_lossy().to_string(),
            MediaSource::NetworkStream { url, .. } => url.clone(),
        }
    }
}

/// 流媒体协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    /// RTSP - 实时流协议（监控摄像头）
    RTSP,
    /// RTMP - 实时消息协议（直播流）
    RTMP,
    /// HLS - HTTP Live Streaming
    HLS,
    /// HTTP - 普通 HTTP 流
    HTTP,
}

impl StreamProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::RTSP => "RTSP",
            StreamProtocol::RTMP => "RTMP",
            StreamProtocol::HLS => "HLS",
            StreamProtocol::HTTP => "HTTP",
        }
    }
}

/// 选中的音视频流索引
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamIndices {
    pub video: Option<usize>,
    pub audio: Option<usize>,
}

/// 输出像素格式（RGBA 系列，4 字节/像素，行优先，无行填充）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPixelFormat {
    #[default]
    Rgba,
    Bgra,
    Argb,
    Abgr,
}

impl OutputPixelFormat {
    pub fn to_pixel(self) -> format::Pixel {
        match self {
            OutputPixelFormat::Rgba => format::Pixel::RGBA,
            OutputPixelFormat::Bgra => format::Pixel::BGRA,
            OutputPixelFormat::Argb => format::Pixel::ARGB,
            OutputPixelFormat::Abgr => format::Pixel::ABGR,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        4
    }
}

/// 解码后的视频帧（主机内存）
///
/// 由视频解码线程创建并推入输出队列，出队后所有权归消费者，drop 即释放。
pub struct DecodedFrame {
    frame: frame::Video,
    pts: f64,
}

impl DecodedFrame {
    pub(crate) fn new(frame: frame::Video, pts: f64) -> Self {
        Self { frame, pts }
    }

    /// 呈现时间戳（秒）
    pub fn pts(&self) -> f64 {
        self.pts
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn format(&self) -> format::Pixel {
        self.frame.format()
    }

    /// 底层像素数据（各平面带 stride），需要紧凑缓冲时使用 `FrameTransform::resize`
    pub fn frame(&self) -> &frame::Video {
        &self.frame
    }
}

impl std::fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("pts", &self.pts)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.format())
            .finish()
    }
}

/// 解码并重采样后的音频数据（S16 交错 PCM）
///
/// 只在回调期间借给处理函数，回调返回后立即释放。
#[derive(Debug, Clone)]
pub struct DecodedSample {
    pub pts: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// 每声道采样数
    pub samples: usize,
    pub data: Vec<u8>,
}

impl DecodedSample {
    /// 字节长度
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// 媒体信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: i64,          // 总时长（毫秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_source_from_url() {
        assert!(matches!(
            MediaSource::from_url("rtsp://cam/1"),
            MediaSource::NetworkStream { protocol: StreamProtocol::RTSP, .. }
        ));
        assert!(matches!(
            MediaSource::from_url("https://cdn/live/index.m3u8"),
            MediaSource::NetworkStream { protocol: StreamProtocol::HLS, .. }
        ));
        assert!(matches!(
            MediaSource::from_url("http://host/clip.mp4"),
            MediaSource::NetworkStream { protocol: StreamProtocol::HTTP, .. }
        ));

        assert_eq!(StreamProtocol::RTMP.as_str(), "RTMP");

        let local = MediaSource::from_url("/tmp/clip.mkv");
        assert!(!local.is_network_stream());
        assert_eq!(local.location(), "/tmp/clip.mkv");
    }

    #[test]
    fn test_output_pixel_format_serde() {
        let fmt: OutputPixelFormat = serde_json::from_str("\"abgr\"").unwrap();
        assert_eq!(fmt, OutputPixelFormat::Abgr);
        assert_eq!(fmt.to_pixel(), format::Pixel::ABGR);
        assert_eq!(OutputPixelFormat::default().bytes_per_pixel(), 4);
    }
}
