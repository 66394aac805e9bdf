use parking_lot::Mutex;
use std::sync::Arc;

/// 流时钟 - 单条流的当前呈现时间（秒），用于音视频同步
///
/// 解码线程写入，消费端（渲染/播放）读取。
#[derive(Clone, Default)]
pub struct StreamClock {
    seconds: Arc<Mutex<f64>>,
}

impl StreamClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前时钟（秒）
    pub fn now(&self) -> f64 {
        *self.seconds.lock()
    }

    /// 显式重置/设置时钟
    pub fn set_time(&self, seconds: f64) {
        *self.seconds.lock() = seconds;
    }

    /// 视频帧推进时钟，返回该帧的呈现时间戳（秒）
    ///
    /// - 原始时间戳为 0 或未知时沿用当前时钟，避免稀疏时间戳流出现跳变
    /// - 重复帧（隔行/telecine）按 `repeat * time_base / 2` 追加显示时长
    pub fn advance_video(&self, raw_pts: Option<i64>, time_base: f64, repeat: i32) -> f64 {
        let mut clock = self.seconds.lock();

        let pts = match raw_pts {
            Some(ticks) if ticks != 0 => ticks as f64 * time_base,
            _ => *clock,
        };

        let frame_delay = time_base + f64::from(repeat) * time_base * 0.5;
        *clock = pts + frame_delay;
        pts
    }

    /// 音频帧的呈现时间戳（秒），不修改时钟；时间戳未知时取当前时钟
    pub fn audio_pts(&self, raw_pts: Option<i64>, time_base: f64) -> f64 {
        match raw_pts {
            Some(ticks) => ticks as f64 * time_base,
            None => self.now(),
        }
    }

    /// 音频帧推进时钟（无重复帧补偿），时间戳未知时保持不变
    pub fn advance_audio(&self, raw_pts: Option<i64>, time_base: f64) -> f64 {
        let mut clock = self.seconds.lock();
        if let Some(ticks) = raw_pts {
            *clock = ticks as f64 * time_base;
        }
        *clock
    }
}
