use crate::core::cancel::interrupt_blocking_io;
use crate::core::{MediaInfo, MediaSource, PlayerError, Result, StopToken, StreamIndices};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{ffi, format, media};
use crate::player::demuxer_source::{PacketSource, ReadOutcome};
use log::{debug, info};

/// 解封装器 - 负责读取媒体文件并分离音视频流
pub struct Demuxer {
    input_ctx: format::context::Input,
    indices: StreamIndices,
    media_info: MediaInfo,
    source_path: String,
    // 中断回调的 opaque 指向令牌内部，持有一份保证其存活
    stop: StopToken,
}

impl Demuxer {
    /// 打开媒体源，选择最佳音视频流，并安装与停止令牌绑定的中断回调
    pub fn open(source: &MediaSource, stop: StopToken) -> Result<Self> {
        let path = source.location();
        info!("正在打开: {}", path);

        let mut input_ctx = if let MediaSource::NetworkStream { protocol, .. } = source {
            info!("🌐 检测到 {} 网络流，应用优化选项", protocol.as_str());
            format::input_with_dictionary(&path, network_options(&path))
                .map_err(|e| PlayerError::OpenError(format!("无法打开网络流 {}: {}", path, e)))?
        } else {
            format::input(&path)
                .map_err(|e| PlayerError::OpenError(format!("无法打开文件 {}: {}", path, e)))?
        };

        // 此后所有阻塞读取都可以被 stop() 打断
        unsafe {
            (*input_ctx.as_mut_ptr()).interrupt_callback = ffi::AVIOInterruptCB {
                callback: Some(interrupt_blocking_io),
                opaque: stop.interrupt_opaque(),
            };
        }

        let indices = StreamIndices {
            video: input_ctx.streams().best(media::Type::Video).map(|s| s.index()),
            audio: input_ctx.streams().best(media::Type::Audio).map(|s| s.index()),
        };

        if indices.video.is_none() && indices.audio.is_none() {
            return Err(PlayerError::NoDecodableStream);
        }

        debug!("视频流索引: {:?}", indices.video);
        debug!("音频流索引: {:?}", indices.audio);

        let mut demuxer = Self {
            input_ctx,
            indices,
            media_info: MediaInfo::default(),
            source_path: path,
            stop,
        };
        demuxer.media_info = demuxer.extract_media_info();

        Ok(demuxer)
    }

    /// 提取媒体信息（内部使用）
    fn extract_media_info(&self) -> MediaInfo {
        let mut info = MediaInfo {
            duration: self.input_ctx.duration().max(0) / 1000, // 微秒转毫秒
            fps: self.fps(),
            video_codec: "none".to_string(),
            audio_codec: "none".to_string(),
            ..MediaInfo::default()
        };

        if let Some(stream) = self.indices.video.and_then(|idx| self.input_ctx.stream(idx)) {
            let parameters = stream.parameters();
            info.video_codec = parameters.id().name().to_string();
            unsafe {
                let raw = parameters.as_ptr();
                info.width = (*raw).width.max(0) as u32;
                info.height = (*raw).height.max(0) as u32;
            }
        }

        if let Some(stream) = self.indices.audio.and_then(|idx| self.input_ctx.stream(idx)) {
            let parameters = stream.parameters();
            info.audio_codec = parameters.id().name().to_string();
            unsafe {
                let raw = parameters.as_ptr();
                info.sample_rate = (*raw).sample_rate.max(0) as u32;
                info.channels = (*raw).ch_layout.nb_channels.max(0) as u16;
            }
        }

        info
    }

    pub fn indices(&self) -> StreamIndices {
        self.indices
    }

    pub fn input(&self) -> &format::context::Input {
        &self.input_ctx
    }

    /// 容器声明的名义帧率（仅供参考，不用于节奏控制）
    pub fn fps(&self) -> f64 {
        self.indices
            .video
            .and_then(|idx| self.input_ctx.stream(idx))
            .map(|stream| {
                let rate = stream.rate();
                if rate.denominator() == 0 {
                    0.0
                } else {
                    f64::from(rate)
                }
            })
            .unwrap_or(0.0)
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    /// 停止：设置共享停止标志，阻塞中的读取会被中断回调打断
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl PacketSource for Demuxer {
    type Packet = ffmpeg::Packet;

    /// 不使用 `packets()` 迭代器：它会吞掉非 EOF 错误并无限重试，
    /// 中断后无法退出。
    fn read_packet(&mut self) -> Result<ReadOutcome<ffmpeg::Packet>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => Ok(ReadOutcome::Packet(packet)),
            Err(ffmpeg::Error::Eof) => Ok(ReadOutcome::EndOfInput),
            Err(ffmpeg::Error::Exit) if self.stop.is_cancelled() => Ok(ReadOutcome::Interrupted),
            Err(e) => Err(e.into()),
        }
    }

    fn stream_index(packet: &ffmpeg::Packet) -> usize {
        packet.stream()
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}

/// 网络流的打开选项
fn network_options(path: &str) -> ffmpeg::Dictionary<'static> {
    let mut options = ffmpeg::Dictionary::new();

    // discardcorrupt: 丢弃损坏的帧
    // genpts: 生成 PTS（防止时间戳问题）
    // nobuffer: 减少缓冲延迟
    options.set("fflags", "+discardcorrupt+genpts+nobuffer");

    options.set("analyzeduration", "5000000");  // 5秒
    options.set("probesize", "10000000");       // 10MB

    options.set("rw_timeout", "8000000");       // 读写操作 8s 超时
    options.set("reconnect", "1");
    options.set("reconnect_streamed", "1");
    options.set("reconnect_delay_max", "4");

    if path.contains(".m3u8") {
        info!("🎬 HLS 流检测，应用 HLS 优化");
        options.set("live_start_index", "-1");
        options.set("max_reload", "10");
        options.set("http_persistent", "1");
    }

    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_is_open_error() {
        ffmpeg::init().unwrap();
        let source = MediaSource::from_url("/nonexistent/definitely-missing.mp4");
        let err = Demuxer::open(&source, StopToken::new()).err().unwrap();
        assert!(matches!(err, PlayerError::OpenError(_)));
        assert!(err.is_open_error());
    }

    #[test]
    fn test_hls_options() {
        let options = network_options("https://cdn/live/index.m3u8");
        assert_eq!(options.get("max_reload"), Some("10"));
        assert_eq!(options.get("reconnect"), Some("1"));

        let options = network_options("rtsp://cam/1");
        assert_eq!(options.get("max_reload"), None);
    }
}
