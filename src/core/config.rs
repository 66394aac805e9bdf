use crate::core::{OutputPixelFormat, Result};
use crate::player::hw_decoder::HWAccelType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 解码核心配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// 是否尝试硬件加速（失败自动回退软解）
    pub hwaccel: bool,
    /// 优先尝试的硬件类型，None 按 FFmpeg 枚举顺序
    pub preferred_hwaccel: Option<HWAccelType>,
    /// `resize` 的目标像素格式
    pub output_pixel_format: OutputPixelFormat,
    /// 视频包队列容量（0 = 无界）
    pub video_packet_capacity: usize,
    /// 音频包队列容量（0 = 无界）
    pub audio_packet_capacity: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        // 视频：200 packets ≈ 8秒（25fps）
        // 音频：150 packets ≈ 3秒（48kHz）
        Self {
            hwaccel: cfg!(feature = "hwaccel"),
            preferred_hwaccel: None,
            output_pixel_format: OutputPixelFormat::Rgba,
            video_packet_capacity: 200,
            audio_packet_capacity: 150,
        }
    }
}

impl DecodeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// 未编译 hwaccel 特性时忽略配置，始终软解
    pub fn hwaccel_enabled(&self) -> bool {
        self.hwaccel && cfg!(feature = "hwaccel")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DecodeConfig::default();
        assert_eq!(config.output_pixel_format, OutputPixelFormat::Rgba);
        assert_eq!(config.video_packet_capacity, 200);
        assert_eq!(config.audio_packet_capacity, 150);
        assert!(config.preferred_hwaccel.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = DecodeConfig::from_json_str(
            r#"{ "hwaccel": false, "output_pixel_format": "bgra", "preferred_hwaccel": "VAAPI" }"#,
        )
        .unwrap();
        assert!(!config.hwaccel);
        assert!(!config.hwaccel_enabled());
        assert_eq!(config.output_pixel_format, OutputPixelFormat::Bgra);
        assert_eq!(config.preferred_hwaccel, Some(HWAccelType::VAAPI));
        assert_eq!(config.audio_packet_capacity, 150);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = DecodeConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, crate::core::PlayerError::ConfigError(_)));
    }
}
