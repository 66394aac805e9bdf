use crate::core::{PlayerError, Result, StopToken, StreamClock};
use crate::player::packet_queue::{PacketReceiver, Pop};
use ffmpeg_next::{codec, format, media};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 单条流的运行时状态（解码线程写，外部读）
pub struct StreamState {
    pub index: usize,
    /// tick → 秒
    pub time_base: f64,
    pub clock: StreamClock,
    aspect_ratio: Mutex<f64>,
    packets_decoded: AtomicU64,
    packets_failed: AtomicU64,
    units_emitted: AtomicU64,
    units_dropped: AtomicU64,
}

impl StreamState {
    pub fn new(index: usize, time_base: f64) -> Self {
        Self {
            index,
            time_base,
            clock: StreamClock::new(),
            aspect_ratio: Mutex::new(1.0),
            packets_decoded: AtomicU64::new(0),
            packets_failed: AtomicU64::new(0),
            units_emitted: AtomicU64::new(0),
            units_dropped: AtomicU64::new(0),
        }
    }

    pub fn aspect_ratio(&self) -> f64 {
        *self.aspect_ratio.lock()
    }

    pub fn set_aspect_ratio(&self, ratio: f64) {
        *self.aspect_ratio.lock() = ratio;
    }

    pub fn packets_decoded(&self) -> u64 {
        self.packets_decoded.load(Ordering::Relaxed)
    }

    pub fn packets_failed(&self) -> u64 {
        self.packets_failed.load(Ordering::Relaxed)
    }

    pub fn units_emitted(&self) -> u64 {
        self.units_emitted.load(Ordering::Relaxed)
    }

    pub fn units_dropped(&self) -> u64 {
        self.units_dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn record_emitted(&self) {
        self.units_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.units_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// 单个数据包的解码逻辑，由视频/音频解码器各自实现
pub trait UnitDecoder: Send {
    type Packet: Send;

    /// 流名称（日志用）
    fn kind(&self) -> &'static str;

    /// 送入一个包并取出当前可用的全部帧/采样。
    /// 返回错误只代表这个包失败，循环继续。
    fn decode_one(&mut self, packet: Self::Packet, stop: &StopToken) -> Result<()>;

    /// 输入结束后冲刷解码器内部缓存的帧
    fn finish(&mut self, _stop: &StopToken) -> Result<()> {
        Ok(())
    }
}

/// 解码循环的退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// 输入结束，队列已清空
    Drained,
    Stopped,
}

/// 流解码器公共部分：输入队列 + 解码循环 + 停止标志
pub struct StreamDecoder<D: UnitDecoder> {
    decoder: D,
    input: PacketReceiver<D::Packet>,
    stop: StopToken,
    state: Arc<StreamState>,
}

impl<D: UnitDecoder> StreamDecoder<D> {
    pub fn new(
        decoder: D,
        input: PacketReceiver<D::Packet>,
        stop: StopToken,
        state: Arc<StreamState>,
    ) -> Self {
        Self {
            decoder,
            input,
            stop,
            state,
        }
    }

    pub fn state(&self) -> &Arc<StreamState> {
        &self.state
    }

    /// 解码循环（在独立线程中运行）
    pub fn run_loop(&mut self) -> LoopExit {
        let kind = self.decoder.kind();
        info!("{} ▶ {}解码线程启动", log_ctx(), kind);

        let exit = loop {
            if self.stop.is_cancelled() {
                break LoopExit::Stopped;
            }

            match self.input.wait_pop(&self.stop) {
                Pop::Packet(packet) => {
                    if self.stop.is_cancelled() {
                        break LoopExit::Stopped;
                    }
                    match self.decoder.decode_one(packet, &self.stop) {
                        Ok(()) => {
                            self.state.packets_decoded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            self.state.packets_failed.fetch_add(1, Ordering::Relaxed);
                            warn!("{}解码失败（已跳过该包）: {}", kind, e);
                        }
                    }
                }
                Pop::EndOfInput => {
                    debug!("{} {}输入结束，冲刷解码器", log_ctx(), kind);
                    if let Err(e) = self.decoder.finish(&self.stop) {
                        warn!("{}冲刷解码器失败: {}", kind, e);
                    }
                    break LoopExit::Drained;
                }
                Pop::Stopped => break LoopExit::Stopped,
            }
        };

        if exit == LoopExit::Stopped && !self.input.is_empty() {
            debug!("{} {}停止时丢弃 {} 个未解码的包", log_ctx(), kind, self.input.len());
        }

        info!(
            "{} ⏹ {}解码线程结束: {:?}（{} 包成功，{} 包失败，输出 {}，丢弃 {}）",
            log_ctx(),
            kind,
            exit,
            self.state.packets_decoded(),
            self.state.packets_failed(),
            self.state.units_emitted(),
            self.state.units_dropped()
        );
        exit
    }

    pub fn into_decoder(self) -> D {
        self.decoder
    }
}

/// 选择最佳流并用其参数构建（未打开的）解码器上下文
///
/// 返回 None 表示容器中没有该类型的流。
pub(crate) fn best_stream_context(
    input: &format::context::Input,
    medium: media::Type,
) -> Result<Option<(codec::Context, Arc<StreamState>)>> {
    let stream = match input.streams().best(medium) {
        Some(stream) => stream,
        None => return Ok(None),
    };

    let context = codec::context::Context::from_parameters(stream.parameters()).map_err(|e| {
        PlayerError::CodecOpen {
            kind: medium_name(medium),
            reason: e.to_string(),
        }
    })?;

    let time_base = stream.time_base();
    let time_base = f64::from(time_base);

    Ok(Some((context, Arc::new(StreamState::new(stream.index(), time_base)))))
}

pub(crate) fn medium_name(medium: media::Type) -> &'static str {
    match medium {
        media::Type::Video => "视频",
        media::Type::Audio => "音频",
        _ => "其他",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::packet_queue::packet_queue;
    use std::time::Duration;

    /// 每个包输出一个单元；值为 0 的包模拟解码失败
    struct MockDecoder {
        seen: Arc<Mutex<Vec<u32>>>,
        finished: bool,
        delay: Duration,
        state: Arc<StreamState>,
    }

    impl UnitDecoder for MockDecoder {
        type Packet = u32;

        fn kind(&self) -> &'static str {
            "测试"
        }

        fn decode_one(&mut self, packet: u32, _stop: &StopToken) -> Result<()> {
            thread::sleep(self.delay);
            if packet == 0 {
                return Err(PlayerError::DecodeError("bad packet".into()));
            }
            self.seen.lock().push(packet);
            self.state.record_emitted();
            Ok(())
        }

        fn finish(&mut self, _stop: &StopToken) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    fn mock(delay: Duration) -> (MockDecoder, Arc<Mutex<Vec<u32>>>, Arc<StreamState>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(StreamState::new(0, 1.0 / 1000.0));
        (
            MockDecoder {
                seen: seen.clone(),
                finished: false,
                delay,
                state: state.clone(),
            },
            seen,
            state,
        )
    }

    #[test]
    fn test_residual_packets_drain_before_exit() {
        let stop = StopToken::new();
        let (tx, rx) = packet_queue(0);
        for i in 1..=20u32 {
            tx.push(i, &stop).unwrap();
        }
        tx.finish();

        let (decoder, seen, state) = mock(Duration::ZERO);
        let mut stream = StreamDecoder::new(decoder, rx, stop, state.clone());
        assert_eq!(stream.run_loop(), LoopExit::Drained);

        assert_eq!(*seen.lock(), (1..=20).collect::<Vec<_>>());
        assert_eq!(state.packets_decoded(), 20);
        assert!(stream.into_decoder().finished);
    }

    #[test]
    fn test_decode_error_skips_only_that_packet() {
        let stop = StopToken::new();
        let (tx, rx) = packet_queue(0);
        for i in [1u32, 0, 2, 0, 3] {
            tx.push(i, &stop).unwrap();
        }
        tx.finish();

        let (decoder, seen, state) = mock(Duration::ZERO);
        let mut stream = StreamDecoder::new(decoder, rx, stop, state.clone());
        assert_eq!(stream.run_loop(), LoopExit::Drained);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
        assert_eq!(state.packets_failed(), 2);
        assert_eq!(state.units_emitted(), 3);
    }

    #[test]
    fn test_loop_waits_for_late_packets() {
        let stop = StopToken::new();
        let (tx, rx) = packet_queue(4);
        let (decoder, seen, state) = mock(Duration::ZERO);
        let loop_stop = stop.clone();
        let handle = thread::spawn(move || {
            StreamDecoder::new(decoder, rx, loop_stop, state).run_loop()
        });

        for i in 1..=3u32 {
            thread::sleep(Duration::from_millis(10));
            tx.push(i, &stop).unwrap();
        }
        tx.finish();

        assert_eq!(handle.join().unwrap(), LoopExit::Drained);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_stop_mid_stream_terminates_loop() {
        let stop = StopToken::new();
        let (tx, rx) = packet_queue(0);
        for i in 1..=1000u32 {
            tx.push(i, &stop).unwrap();
        }

        let (decoder, seen, state) = mock(Duration::from_millis(1));
        let loop_stop = stop.clone();
        let handle = thread::spawn(move || {
            StreamDecoder::new(decoder, rx, loop_stop, state).run_loop()
        });

        thread::sleep(Duration::from_millis(30));
        stop.cancel();
        let processed_at_stop = seen.lock().len();

        assert_eq!(handle.join().unwrap(), LoopExit::Stopped);
        // 停止后最多再完成正在处理的那个包
        assert!(seen.lock().len() <= processed_at_stop + 1);
        assert!(seen.lock().len() < 1000);
        drop(tx);
    }

    #[test]
    fn test_stop_while_idle_does_not_deadlock() {
        let stop = StopToken::new();
        let (_tx, rx) = packet_queue::<u32>(1);
        let (decoder, _seen, state) = mock(Duration::ZERO);
        let loop_stop = stop.clone();
        let handle = thread::spawn(move || {
            StreamDecoder::new(decoder, rx, loop_stop, state).run_loop()
        });

        thread::sleep(Duration::from_millis(20));
        stop.cancel();
        assert_eq!(handle.join().unwrap(), LoopExit::Stopped);
    }
}
