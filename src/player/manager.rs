use crate::core::{
    DecodeConfig, DecodedFrame, DecodedSample, MediaInfo, MediaSource, PlayerError, Result, StopToken,
};
use crate::player::decoder::{AudioStreamDecoder, VideoStreamDecoder};
use crate::player::demuxer::Demuxer;
use crate::player::demuxer_thread::{DemuxerThread, PacketRoute};
use crate::player::hw_decoder::{HWAccelType, HardwareDeviceResolver};
use crate::player::packet_queue::{packet_queue, PacketReceiver};
use crate::player::stream::{log_ctx, LoopExit, StreamDecoder, StreamState, UnitDecoder};
use crate::player::transform::{FrameTransform, ScaledImage};
use crossbeam::queue::SegQueue;
use ffmpeg_next as ffmpeg;
use log::{error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 已打开但尚未启动线程的资源
struct Prepared {
    demuxer: Demuxer,
    video: Option<VideoStreamDecoder>,
    audio: Option<AudioStreamDecoder>,
}

/// 解码管理器 - 组装解封装线程与音视频解码线程
///
/// 生命周期：`open` → `start` → 消费帧 → `stop` → `join`。
/// 所有打开阶段的错误（文件、流、编解码器）都在 `open` 中同步返回，
/// 硬件设备也在此时获取，之后才会启动线程。
pub struct DecodeManager {
    config: DecodeConfig,
    stop: StopToken,
    media_info: MediaInfo,
    frames: Arc<SegQueue<DecodedFrame>>,
    video_state: Option<Arc<StreamState>>,
    audio_state: Option<Arc<StreamState>>,
    hw_type: HWAccelType,
    prepared: Option<Prepared>,
    started: bool,
    demux_thread: Option<DemuxerThread>,
    video_thread: Option<JoinHandle<LoopExit>>,
    audio_thread: Option<JoinHandle<LoopExit>>,
}

impl DecodeManager {
    /// 打开媒体源并准备解码器
    ///
    /// `handler` 在音频解码线程上同步调用，每个解码出的音频帧一次。
    pub fn open<F>(source: &MediaSource, config: DecodeConfig, handler: F) -> Result<Self>
    where
        F: FnMut(&DecodedSample) + Send + 'static,
    {
        info!("{} 🎮 创建解码管理器: {}", log_ctx(), source.location());
        ffmpeg::init()?;

        let stop = StopToken::new();
        let demuxer = Demuxer::open(source, stop.clone()).map_err(|e| {
            error!("{} ❌ 打开媒体失败: {}", log_ctx(), e);
            e
        })?;

        let frames = Arc::new(SegQueue::new());
        let resolver = HardwareDeviceResolver::new(config.hwaccel_enabled(), config.preferred_hwaccel);

        let video = VideoStreamDecoder::open(demuxer.input(), &resolver, frames.clone()).map_err(|e| {
            error!("{} ❌ 打开视频解码器失败: {}", log_ctx(), e);
            e
        })?;
        let audio = AudioStreamDecoder::open(demuxer.input(), Box::new(handler)).map_err(|e| {
            error!("{} ❌ 打开音频解码器失败: {}", log_ctx(), e);
            e
        })?;

        if video.is_none() && audio.is_none() {
            return Err(PlayerError::NoDecodableStream);
        }

        let hw_type = video.as_ref().map(|v| v.hw_type()).unwrap_or(HWAccelType::None);
        let media_info = demuxer.media_info().clone();

        info!(
            "{} ✅ 媒体已打开: {}x{} @ {:.2}fps, 视频: {}, 音频: {}, 时长: {}ms, 加速: {}",
            log_ctx(),
            media_info.width,
            media_info.height,
            media_info.fps,
            media_info.video_codec,
            media_info.audio_codec,
            media_info.duration,
            hw_type.name()
        );

        Ok(Self {
            video_state: video.as_ref().map(|v| v.state().clone()),
            audio_state: audio.as_ref().map(|a| a.state().clone()),
            config,
            stop,
            media_info,
            frames,
            hw_type,
            prepared: Some(Prepared { demuxer, video, audio }),
            started: false,
            demux_thread: None,
            video_thread: None,
            audio_thread: None,
        })
    }

    /// 便捷入口：路径或 URL
    pub fn open_url<F>(url: &str, config: DecodeConfig, handler: F) -> Result<Self>
    where
        F: FnMut(&DecodedSample) + Send + 'static,
    {
        Self::open(&MediaSource::from_url(url), config, handler)
    }

    /// 启动解码线程与解封装线程，重复调用无副作用
    pub fn start(&mut self) -> Result<()> {
        let Prepared { demuxer, video, audio } = match self.prepared.take() {
            Some(prepared) => prepared,
            None => {
                warn!("{} ⚠ 解码线程已启动，忽略重复的 start()", log_ctx());
                return Ok(());
            }
        };

        let video_route = match video {
            Some(decoder) => {
                let (tx, rx) = packet_queue(self.config.video_packet_capacity);
                let state = decoder.state().clone();
                let index = state.index;
                self.video_thread = Some(spawn_decoder("video-decoder", decoder, rx, state, self.stop.clone())?);
                Some(PacketRoute::new(index, tx))
            }
            None => None,
        };

        let audio_route = match audio {
            Some(decoder) => {
                let (tx, rx) = packet_queue(self.config.audio_packet_capacity);
                let state = decoder.state().clone();
                let index = state.index;
                self.audio_thread = Some(spawn_decoder("audio-decoder", decoder, rx, state, self.stop.clone())?);
                Some(PacketRoute::new(index, tx))
            }
            None => None,
        };

        self.started = true;
        self.demux_thread = Some(DemuxerThread::start(demuxer, video_route, audio_route, self.stop.clone())?);
        info!("{} ▶ 解码已启动", log_ctx());
        Ok(())
    }

    /// 非阻塞取出下一帧已解码的视频帧
    pub fn get_frame(&self) -> Option<DecodedFrame> {
        self.frames.pop()
    }

    /// 把帧转换为配置的像素格式和目标尺寸
    pub fn resize(&self, frame: &DecodedFrame, width: u32, height: u32) -> Result<ScaledImage> {
        FrameTransform::resize(frame, self.config.output_pixel_format, width, height)
    }

    /// 容器声明的名义帧率
    pub fn fps(&self) -> f64 {
        self.media_info.fps
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    pub fn video_clock(&self) -> f64 {
        self.video_state.as_ref().map(|s| s.clock.now()).unwrap_or(0.0)
    }

    pub fn audio_clock(&self) -> f64 {
        self.audio_state.as_ref().map(|s| s.clock.now()).unwrap_or(0.0)
    }

    /// 视频宽高比（首帧解码后为真实 width / height）
    pub fn aspect_ratio(&self) -> f64 {
        self.video_state.as_ref().map(|s| s.aspect_ratio()).unwrap_or(1.0)
    }

    pub fn video_stats(&self) -> Option<&Arc<StreamState>> {
        self.video_state.as_ref()
    }

    pub fn audio_stats(&self) -> Option<&Arc<StreamState>> {
        self.audio_state.as_ref()
    }

    pub fn is_hardware_accelerated(&self) -> bool {
        self.hw_type != HWAccelType::None
    }

    pub fn hw_type(&self) -> HWAccelType {
        self.hw_type
    }

    /// 输出队列中等待消费的视频帧数
    pub fn frames_pending(&self) -> usize {
        self.frames.len()
    }

    /// 所有线程都已退出（输入耗尽或已停止）；未启动时返回 false
    pub fn is_finished(&self) -> bool {
        if !self.started {
            return false;
        }
        let decoder_done = |handle: &Option<JoinHandle<LoopExit>>| {
            handle.as_ref().map_or(true, |h| h.is_finished())
        };
        decoder_done(&self.video_thread)
            && decoder_done(&self.audio_thread)
            && self.demux_thread.as_ref().map_or(true, |d| d.is_finished())
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// 请求停止（非阻塞，单调）
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            info!("{} ⏹ 请求停止解码", log_ctx());
        }
        self.stop.cancel();
    }

    /// 等待所有线程退出：先解码线程，再解封装线程
    ///
    /// 返回第一个线程 panic 的错误；重复调用无副作用。
    pub fn join(&mut self) -> Result<()> {
        let mut first_error = None;

        for (name, handle) in [("video-decoder", self.video_thread.take()), ("audio-decoder", self.audio_thread.take())] {
            if let Some(handle) = handle {
                match handle.join() {
                    Ok(exit) => info!("{} {} 已退出: {:?}", log_ctx(), name, exit),
                    Err(_) => {
                        error!("{} ❌ {} 线程 panic", log_ctx(), name);
                        first_error.get_or_insert(PlayerError::ThreadPanicked(name));
                    }
                }
            }
        }

        if let Some(mut demux) = self.demux_thread.take() {
            if let Err(e) = demux.join() {
                error!("{} ❌ {}", log_ctx(), e);
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for DecodeManager {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.join() {
            warn!("{} ⚠ 释放解码管理器时出错: {}", log_ctx(), e);
        }
    }
}

fn spawn_decoder<D>(
    name: &str,
    decoder: D,
    input: PacketReceiver<D::Packet>,
    state: Arc<StreamState>,
    stop: StopToken,
) -> Result<JoinHandle<LoopExit>>
where
    D: UnitDecoder + 'static,
{
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || StreamDecoder::new(decoder, input, stop, state).run_loop())?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_source_fails_synchronously() {
        let result = DecodeManager::open_url(
            "/nonexistent/definitely-missing.mkv",
            DecodeConfig::default(),
            |_| panic!("handler must not run"),
        );
        match result {
            Err(e) => assert!(e.is_open_error()),
            Ok(_) => panic!("open should fail"),
        }
    }
}
