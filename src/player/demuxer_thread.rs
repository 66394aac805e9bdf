use crate::core::{PlayerError, Result, StopToken};
use crate::player::demuxer_source::{PacketSource, ReadOutcome};
use crate::player::packet_queue::{PacketSender, PushError};
use crate::player::stream::log_ctx;
use log::{debug, error, info, warn};
use std::thread::{self, JoinHandle};

/// 一条流的包去向：流索引 + 队列发送端
pub struct PacketRoute<P> {
    pub index: usize,
    pub sender: PacketSender<P>,
}

impl<P> PacketRoute<P> {
    pub fn new(index: usize, sender: PacketSender<P>) -> Self {
        Self { index, sender }
    }
}

/// 解封装线程的退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxExit {
    EndOfInput,
    /// 读包出错，按输入结束处理
    ReadFailed,
    Stopped,
}

/// Demuxer 线程管理器
/// - 按流索引把包分发到视频/音频队列，其他流的包直接丢弃
/// - 队列有界，满时阻塞（背压），可被停止令牌打断
/// - 输入结束或读包失败时标记所有队列结束，解码线程取完残留包后退出
pub struct DemuxerThread {
    thread_handle: Option<JoinHandle<DemuxExit>>,
    stop: StopToken,
}

impl DemuxerThread {
    pub fn start<S>(
        source: S,
        video: Option<PacketRoute<S::Packet>>,
        audio: Option<PacketRoute<S::Packet>>,
        stop: StopToken,
    ) -> Result<Self>
    where
        S: PacketSource + 'static,
    {
        let loop_stop = stop.clone();
        let thread_handle = thread::Builder::new()
            .name("demuxer".to_string())
            .spawn(move || Self::demux_loop(source, video, audio, loop_stop))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop,
        })
    }

    /// Demuxer 循环（在独立线程中运行）
    fn demux_loop<S: PacketSource>(
        mut source: S,
        mut video: Option<PacketRoute<S::Packet>>,
        mut audio: Option<PacketRoute<S::Packet>>,
        stop: StopToken,
    ) -> DemuxExit {
        info!("{} 🎬 Demuxer 线程启动: {}", log_ctx(), source.description());

        let mut packet_count: usize = 0;
        let mut video_packet_count: usize = 0;
        let mut audio_packet_count: usize = 0;
        let mut dropped_count: usize = 0;

        let exit = loop {
            if stop.is_cancelled() {
                break DemuxExit::Stopped;
            }

            let packet = match source.read_packet() {
                Ok(ReadOutcome::Packet(packet)) => packet,
                Ok(ReadOutcome::EndOfInput) => {
                    info!("{} 📄 Demuxer 到达文件末尾", log_ctx());
                    break DemuxExit::EndOfInput;
                }
                Ok(ReadOutcome::Interrupted) => break DemuxExit::Stopped,
                Err(e) => {
                    error!("{} ❌ 读取包失败: {}", log_ctx(), e);
                    break DemuxExit::ReadFailed;
                }
            };
            packet_count += 1;

            let index = S::stream_index(&packet);
            let routes_to = |route: &Option<PacketRoute<S::Packet>>| {
                route.as_ref().map_or(false, |r| r.index == index)
            };
            let (route, counter, kind) = if routes_to(&video) {
                (&mut video, &mut video_packet_count, "视频")
            } else if routes_to(&audio) {
                (&mut audio, &mut audio_packet_count, "音频")
            } else {
                // 字幕/数据包，或解码端已退出的流
                dropped_count += 1;
                continue;
            };

            *counter += 1;
            if *counter % 100 == 0 {
                debug!("{} 📦 Demuxer 读取{}包 #{}（total packets {}）", log_ctx(), kind, counter, packet_count);
            }

            let pushed = match route.as_ref() {
                Some(route) => route.sender.push(packet, &stop),
                None => continue,
            };
            match pushed {
                Ok(()) => {}
                Err(PushError::Stopped) => break DemuxExit::Stopped,
                Err(PushError::Closed) => {
                    warn!("{} ⚠ {}解码端已关闭，后续{}包将被丢弃", log_ctx(), kind, kind);
                    route.take();
                }
            }
        };

        if exit != DemuxExit::Stopped {
            for route in [video, audio].into_iter().flatten() {
                route.sender.finish();
            }
        }

        info!(
            "{} 🛑 Demuxer 线程退出: {:?}（共读取 {} 个包：{} 视频，{} 音频，{} 丢弃）",
            log_ctx(),
            exit,
            packet_count,
            video_packet_count,
            audio_packet_count,
            dropped_count
        );
        exit
    }

    /// 设置停止标志（非阻塞），阻塞中的读包/入队都会被唤醒
    pub fn stop(&self) {
        info!("{} 🛑 DemuxerThread::stop() called", log_ctx());
        self.stop.cancel();
    }

    /// 等待线程退出，重复调用返回 Ok(None)
    pub fn join(&mut self) -> Result<Option<DemuxExit>> {
        match self.thread_handle.take() {
            Some(handle) => handle
                .join()
                .map(Some)
                .map_err(|_| PlayerError::ThreadPanicked("demuxer")),
            None => Ok(None),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread_handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for DemuxerThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ DemuxerThread 被 drop，但可能未调用 stop()，正在尝试优雅停止", log_ctx());
            self.stop.cancel();
            let _ = self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::packet_queue::{packet_queue, Pop};
    use std::collections::VecDeque;
    use std::time::Duration;

    /// (流索引, 序号)；None 表示读包出错
    struct ScriptedSource {
        script: VecDeque<Option<(usize, u32)>>,
    }

    impl ScriptedSource {
        fn new(items: impl IntoIterator<Item = Option<(usize, u32)>>) -> Self {
            Self {
                script: items.into_iter().collect(),
            }
        }
    }

    impl PacketSource for ScriptedSource {
        type Packet = (usize, u32);

        fn read_packet(&mut self) -> Result<ReadOutcome<(usize, u32)>> {
            match self.script.pop_front() {
                Some(Some(packet)) => Ok(ReadOutcome::Packet(packet)),
                Some(None) => Err(PlayerError::DecodeError("broken".into())),
                None => Ok(ReadOutcome::EndOfInput),
            }
        }

        fn stream_index(packet: &(usize, u32)) -> usize {
            packet.0
        }

        fn description(&self) -> String {
            "scripted".to_string()
        }
    }

    fn drain(rx: &crate::player::packet_queue::PacketReceiver<(usize, u32)>, stop: &StopToken) -> Vec<u32> {
        let mut out = Vec::new();
        while let Pop::Packet((_, seq)) = rx.wait_pop(stop) {
            out.push(seq);
        }
        out
    }

    #[test]
    fn test_routes_by_stream_index_and_drops_others() {
        let stop = StopToken::new();
        let (vtx, vrx) = packet_queue(0);
        let (atx, arx) = packet_queue(0);
        let source = ScriptedSource::new(
            [(0, 1), (1, 2), (2, 3), (0, 4), (1, 5)].map(Some),
        );

        let mut demux = DemuxerThread::start(
            source,
            Some(PacketRoute::new(0, vtx)),
            Some(PacketRoute::new(1, atx)),
            stop.clone(),
        )
        .unwrap();
        assert_eq!(demux.join().unwrap(), Some(DemuxExit::EndOfInput));

        assert_eq!(drain(&vrx, &stop), vec![1, 4]);
        assert_eq!(drain(&arx, &stop), vec![2, 5]);
        assert!(vrx.is_end_of_input());
        assert!(arx.is_end_of_input());
    }

    #[test]
    fn test_read_error_ends_input() {
        let stop = StopToken::new();
        let (vtx, vrx) = packet_queue(0);
        let source = ScriptedSource::new([Some((0, 1)), None, Some((0, 2))]);

        let mut demux =
            DemuxerThread::start(source, Some(PacketRoute::new(0, vtx)), None, stop.clone()).unwrap();
        assert_eq!(demux.join().unwrap(), Some(DemuxExit::ReadFailed));
        assert_eq!(drain(&vrx, &stop), vec![1]);
        assert_eq!(demux.join().unwrap(), None);
    }

    #[test]
    fn test_stop_releases_backpressured_demuxer() {
        let stop = StopToken::new();
        let (vtx, _vrx) = packet_queue(2);
        let source = ScriptedSource::new((0..100).map(|i| Some((0, i))));

        let mut demux =
            DemuxerThread::start(source, Some(PacketRoute::new(0, vtx)), None, stop.clone()).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!demux.is_finished());

        demux.stop();
        assert_eq!(demux.join().unwrap(), Some(DemuxExit::Stopped));
    }

    #[test]
    fn test_closed_route_does_not_stop_other_stream() {
        let stop = StopToken::new();
        let (vtx, vrx) = packet_queue(0);
        let (atx, arx) = packet_queue(0);
        drop(vrx);
        let source = ScriptedSource::new([(0, 1), (1, 2), (0, 3), (1, 4)].map(Some));

        let mut demux = DemuxerThread::start(
            source,
            Some(PacketRoute::new(0, vtx)),
            Some(PacketRoute::new(1, atx)),
            stop.clone(),
        )
        .unwrap();
        assert_eq!(demux.join().unwrap(), Some(DemuxExit::EndOfInput));
        assert_eq!(drain(&arx, &stop), vec![2, 4]);
    }
}
