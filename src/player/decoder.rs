use crate::core::{DecodedFrame, DecodedSample, PlayerError, Result, StopToken};
use crate::player::hw_decoder::{transfer_to_host, HWAccelType, HardwareContext, HardwareDeviceResolver};
use crate::player::stream::{best_stream_context, StreamState, UnitDecoder};
use crate::player::transform::SampleTransform;
use crossbeam::queue::SegQueue;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, util};
use log::{debug, info, warn};
use std::sync::Arc;

/// 解码器返回"需要更多输入"或"已到流末尾"，本次排空结束
pub(crate) fn is_drained(err: &ffmpeg::Error) -> bool {
    match err {
        ffmpeg::Error::Eof => true,
        ffmpeg::Error::Other { errno } => *errno == ffmpeg::error::EAGAIN,
        _ => false,
    }
}

/// 解码出的帧在哪块内存里
pub enum FrameResidency {
    /// 显存中的硬件帧，需要先传回主机内存
    HardwareResident(util::frame::Video),
    /// 已在主机内存，直接使用
    HostResident(util::frame::Video),
}

impl FrameResidency {
    pub fn classify(frame: util::frame::Video, hw: Option<&HardwareContext>) -> Self {
        match hw {
            Some(hw) if hw.is_hw_frame(&frame) => FrameResidency::HardwareResident(frame),
            _ => FrameResidency::HostResident(frame),
        }
    }

    /// 解析为唯一一块主机内存帧
    pub fn into_host(self) -> Result<util::frame::Video> {
        match self {
            FrameResidency::HardwareResident(frame) => transfer_to_host(&frame),
            FrameResidency::HostResident(frame) => Ok(frame),
        }
    }
}

/// 视频流解码器（支持硬件加速和软件解码）
pub struct VideoStreamDecoder {
    decoder: codec::decoder::Video,
    // 必须在 decoder 之后 drop：get_format 回调引用了其中的像素格式
    hw: Option<HardwareContext>,
    state: Arc<StreamState>,
    output: Arc<SegQueue<DecodedFrame>>,
}

// 解码器上下文只在视频解码线程中使用
unsafe impl Send for VideoStreamDecoder {}

impl VideoStreamDecoder {
    /// 从容器中选择最佳视频流并打开解码器，优先硬件加速
    ///
    /// 挂上硬件设备后打不开时回退软解；返回 Ok(None) 表示没有视频流。
    pub fn open(
        input: &format::context::Input,
        resolver: &HardwareDeviceResolver,
        output: Arc<SegQueue<DecodedFrame>>,
    ) -> Result<Option<Self>> {
        let (context, state) = match best_stream_context(input, media::Type::Video)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let hw = match ffmpeg::decoder::find(context.id()) {
            Some(codec) => resolver.resolve(&codec),
            None => None,
        };

        let (decoder, hw) = match hw {
            Some(hw) => fall_back_to_software(open_hardware(context, hw), || open_software(input))?,
            None => (open_video_codec(context)?, None),
        };

        Ok(Some(Self::from_opened(decoder, hw, state, output)))
    }

    /// 用已打开的解码器构建（打开阶段与测试共用）
    pub(crate) fn from_opened(
        decoder: codec::decoder::Video,
        hw: Option<HardwareContext>,
        state: Arc<StreamState>,
        output: Arc<SegQueue<DecodedFrame>>,
    ) -> Self {
        // 容器声明的采样宽高比，首帧解码后会被真实尺寸覆盖
        let ratio = f64::from(decoder.aspect_ratio());
        state.set_aspect_ratio(if ratio.is_finite() && ratio != 0.0 { ratio } else { 1.0 });

        info!(
            "视频解码器: {}x{}, 格式: {:?}, 时间基: {}, 加速: {}",
            decoder.width(),
            decoder.height(),
            decoder.format(),
            state.time_base,
            hw.as_ref().map(|h| h.hw_type()).unwrap_or(HWAccelType::None).name()
        );

        Self {
            decoder,
            hw,
            state,
            output,
        }
    }

    pub fn state(&self) -> &Arc<StreamState> {
        &self.state
    }

    /// 是否使用硬件加速
    pub fn is_hardware_accelerated(&self) -> bool {
        self.hw.is_some()
    }

    pub fn hw_type(&self) -> HWAccelType {
        self.hw.as_ref().map(|h| h.hw_type()).unwrap_or(HWAccelType::None)
    }

    /// 取出当前可用的全部帧
    fn drain(&mut self, stop: &StopToken) -> Result<()> {
        while !stop.is_cancelled() {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => self.emit(decoded),
                Err(e) if is_drained(&e) => break,
                Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
            }
        }
        Ok(())
    }

    fn emit(&mut self, decoded: util::frame::Video) {
        let raw_pts = decoded.pts();
        let repeat = decoded.repeat() as i32;

        let host = match FrameResidency::classify(decoded, self.hw.as_ref()).into_host() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{}，丢弃该帧", e);
                self.state.record_dropped();
                return;
            }
        };

        let pts = self.state.clock.advance_video(raw_pts, self.state.time_base, repeat);

        // 拿到真实尺寸后覆盖容器声明的宽高比
        if host.height() > 0 {
            self.state.set_aspect_ratio(f64::from(host.width()) / f64::from(host.height()));
        }

        self.output.push(DecodedFrame::new(host, pts));
        self.state.record_emitted();
    }
}

impl UnitDecoder for VideoStreamDecoder {
    type Packet = ffmpeg::Packet;

    fn kind(&self) -> &'static str {
        "视频"
    }

    fn decode_one(&mut self, packet: ffmpeg::Packet, stop: &StopToken) -> Result<()> {
        self.decoder
            .send_packet(&packet)
            .map_err(|e| PlayerError::DecodeError(e.to_string()))?;
        self.drain(stop)
    }

    fn finish(&mut self, stop: &StopToken) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(()),
            Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
        }
        self.drain(stop)
    }
}

fn open_video_codec(context: codec::Context) -> Result<codec::decoder::Video> {
    context.decoder().video().map_err(|e| PlayerError::CodecOpen {
        kind: "视频",
        reason: e.to_string(),
    })
}

/// 挂上硬件设备后打开解码器
///
/// 失败时上下文先释放，`hw` 随后才 drop。
fn open_hardware(
    mut context: codec::Context,
    hw: HardwareContext,
) -> Result<(codec::decoder::Video, Option<HardwareContext>)> {
    // SAFETY: hw 与 decoder 一起存放在 VideoStreamDecoder 中，字段顺序保证 decoder 先释放
    unsafe { hw.attach(&mut context)? };
    let decoder = open_video_codec(context)?;
    Ok((decoder, Some(hw)))
}

/// 重新从容器参数构建上下文，不挂硬件设备
fn open_software(input: &format::context::Input) -> Result<(codec::decoder::Video, Option<HardwareContext>)> {
    let (context, _) =
        best_stream_context(input, media::Type::Video)?.ok_or(PlayerError::NoDecodableStream)?;
    Ok((open_video_codec(context)?, None))
}

/// 硬件路径打开失败时改走软解
fn fall_back_to_software<T>(accelerated: Result<T>, software: impl FnOnce() -> Result<T>) -> Result<T> {
    accelerated.or_else(|e| {
        warn!("⚠ 硬件解码器打开失败，回退 CPU 软解: {}", e);
        software()
    })
}

/// 音频回调：在音频解码线程上同步执行，数据只在回调期间有效
pub type SampleHandler = Box<dyn FnMut(&DecodedSample) + Send>;

/// 音频流解码器
pub struct AudioStreamDecoder {
    decoder: codec::decoder::Audio,
    transform: SampleTransform,
    handler: SampleHandler,
    state: Arc<StreamState>,
}

unsafe impl Send for AudioStreamDecoder {}

impl AudioStreamDecoder {
    /// 从容器中选择最佳音频流并打开解码器（音频不走硬件加速）
    pub fn open(input: &format::context::Input, handler: SampleHandler) -> Result<Option<Self>> {
        let (context, state) = match best_stream_context(input, media::Type::Audio)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let decoder = context.decoder().audio().map_err(|e| PlayerError::CodecOpen {
            kind: "音频",
            reason: e.to_string(),
        })?;

        Ok(Some(Self::from_opened(decoder, handler, state)))
    }

    pub(crate) fn from_opened(
        decoder: codec::decoder::Audio,
        handler: SampleHandler,
        state: Arc<StreamState>,
    ) -> Self {
        info!(
            "音频解码器: {} Hz, {} 声道, 格式: {:?} → S16",
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );

        Self {
            decoder,
            transform: SampleTransform::new(),
            handler,
            state,
        }
    }

    pub fn state(&self) -> &Arc<StreamState> {
        &self.state
    }

    fn drain(&mut self, stop: &StopToken) -> Result<()> {
        while !stop.is_cancelled() {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => self.emit(&decoded, stop),
                Err(e) if is_drained(&e) => break,
                Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
            }
        }
        Ok(())
    }

    fn emit(&mut self, decoded: &util::frame::Audio, stop: &StopToken) {
        let pts = self.state.clock.audio_pts(decoded.pts(), self.state.time_base);

        let pcm = match self.transform.convert(decoded, pts) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("{}，丢弃该音频帧", e);
                self.state.record_dropped();
                return;
            }
        };

        // 停止后不再回调
        if stop.is_cancelled() {
            return;
        }
        // 只有真正交付的采样才推进时钟
        self.state.clock.advance_audio(decoded.pts(), self.state.time_base);
        (self.handler)(&pcm);
        self.state.record_emitted();
        debug!("🔊 音频帧: pts={:.3}s, {} 字节", pts, pcm.size());
    }
}

impl UnitDecoder for AudioStreamDecoder {
    type Packet = ffmpeg::Packet;

    fn kind(&self) -> &'static str {
        "音频"
    }

    fn decode_one(&mut self, packet: ffmpeg::Packet, stop: &StopToken) -> Result<()> {
        self.decoder
            .send_packet(&packet)
            .map_err(|e| PlayerError::DecodeError(e.to_string()))?;
        self.drain(stop)
    }

    fn finish(&mut self, stop: &StopToken) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(()),
            Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
        }
        self.drain(stop)
    }
}
