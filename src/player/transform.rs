// 像素缩放与音频重采样

use crate::core::{DecodedFrame, DecodedSample, OutputPixelFormat, PlayerError, Result};
use ffmpeg_next::{ffi, software, util};
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::{sample, Sample};
use log::debug;

/// 缩放后的紧凑图像（行优先，无行填充）
#[derive(Debug, Clone)]
pub struct ScaledImage {
    pub width: u32,
    pub height: u32,
    pub format: OutputPixelFormat,
    pub data: Vec<u8>,
}

impl ScaledImage {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// 标准图像缓冲区大小（对齐为 1，即无额外填充）
pub fn image_buffer_size(format: OutputPixelFormat, width: u32, height: u32) -> usize {
    let size = unsafe {
        ffi::av_image_get_buffer_size(format.to_pixel().into(), width as i32, height as i32, 1)
    };
    size.max(0) as usize
}

pub struct FrameTransform;

impl FrameTransform {
    /// 按需把解码帧转换为目标像素格式和分辨率
    pub fn resize(
        frame: &DecodedFrame,
        format: OutputPixelFormat,
        width: u32,
        height: u32,
    ) -> Result<ScaledImage> {
        Self::resize_video(frame.frame(), format, width, height)
    }

    pub fn resize_video(
        source: &util::frame::Video,
        format: OutputPixelFormat,
        width: u32,
        height: u32,
    ) -> Result<ScaledImage> {
        if width == 0 || height == 0 {
            return Err(PlayerError::InvalidDimensions { width, height });
        }

        let mut scaler = software::scaling::Context::get(
            source.format(),
            source.width(),
            source.height(),
            format.to_pixel(),
            width,
            height,
            software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| PlayerError::ScaleError(e.to_string()))?;

        let mut scaled = util::frame::Video::empty();
        scaler
            .run(source, &mut scaled)
            .map_err(|e| PlayerError::ScaleError(e.to_string()))?;

        // 复制数据到连续内存（去掉 stride 填充）
        let size = image_buffer_size(format, width, height);
        let row_size = width as usize * format.bytes_per_pixel();
        let stride = scaled.stride(0);
        let plane = scaled.data(0);

        let mut data = vec![0u8; size];
        for (y, row) in data.chunks_exact_mut(row_size).enumerate() {
            let src_offset = y * stride;
            row.copy_from_slice(&plane[src_offset..src_offset + row_size]);
        }

        Ok(ScaledImage {
            width,
            height,
            format,
            data,
        })
    }
}

/// 按输入声道数选择输出声道布局
pub fn output_channel_layout(channels: u16) -> ChannelLayout {
    match channels {
        1 => ChannelLayout::MONO,
        2 => ChannelLayout::STEREO,
        n => ChannelLayout::default(i32::from(n)),
    }
}

/// S16 交错 PCM 的字节数
pub fn pcm_len(samples: usize, channels: u16) -> usize {
    samples * channels as usize * OUTPUT_BYTES_PER_SAMPLE
}

pub const OUTPUT_SAMPLE_FORMAT: Sample = Sample::I16(sample::Type::Packed);
pub const OUTPUT_BYTES_PER_SAMPLE: usize = 2;

/// 音频重采样：任意输入格式 → S16 交错，声道数与采样率保持不变
///
/// 重采样器按输入参数缓存，参数变化时重建。
#[derive(Default)]
pub struct SampleTransform {
    resampler: Option<(ResamplerKey, software::resampling::Context)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResamplerKey {
    format: Sample,
    layout: ChannelLayout,
    channels: u16,
    rate: u32,
}

// SwrContext 本身不是 Send，但每个 SampleTransform 只在音频解码线程中使用
unsafe impl Send for SampleTransform {}

impl SampleTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert(&mut self, frame: &util::frame::Audio, pts: f64) -> Result<DecodedSample> {
        let channels = frame.channels();
        let rate = frame.rate();

        // 部分解码器不填声道布局，按声道数取默认布局
        let layout = if frame.channel_layout().is_empty() {
            ChannelLayout::default(i32::from(channels))
        } else {
            frame.channel_layout()
        };

        let key = ResamplerKey {
            format: frame.format(),
            layout,
            channels,
            rate,
        };

        if self.resampler.as_ref().map(|(k, _)| *k) != Some(key) {
            debug!(
                "🔧 初始化音频重采样器: {:?}/{}ch/{}Hz → S16/{}ch",
                key.format, channels, rate, channels
            );
            let context = software::resampling::Context::get(
                key.format,
                layout,
                rate,
                OUTPUT_SAMPLE_FORMAT,
                output_channel_layout(channels),
                rate,
            )
            .map_err(|e| PlayerError::ResampleError(e.to_string()))?;
            self.resampler = Some((key, context));
        }

        let resampler = match self.resampler.as_mut() {
            Some((_, context)) => context,
            None => return Err(PlayerError::ResampleError("重采样器未初始化".to_string())),
        };

        let mut resampled = util::frame::Audio::empty();
        resampler
            .run(frame, &mut resampled)
            .map_err(|e| PlayerError::ResampleError(e.to_string()))?;

        let samples = resampled.samples();
        let size = pcm_len(samples, channels);
        let plane = resampled.data(0);
        if plane.len() < size {
            return Err(PlayerError::ResampleError(format!(
                "输出缓冲不足: {} < {}",
                plane.len(),
                size
            )));
        }

        Ok(DecodedSample {
            pts,
            sample_rate: rate,
            channels,
            samples,
            data: plane[..size].to_vec(),
        })
    }
}
