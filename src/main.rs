use anyhow::{Context, Result};
use log::{info, warn};
use myy_decoder::{DecodeConfig, DecodeManager, MediaSource};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let mut args = std::env::args().skip(1);
    let source = args
        .next()
        .context("用法: myy_decoder <文件路径或 URL> [配置 JSON]")?;
    let config = match args.next() {
        Some(path) => DecodeConfig::from_json_file(&path)
            .with_context(|| format!("读取配置失败: {}", path))?,
        None => DecodeConfig::default(),
    };

    info!("🎬 MYY Decoder - 无界面解码探测");

    let pcm_bytes = Arc::new(AtomicU64::new(0));
    let pcm_samples = Arc::new(AtomicU64::new(0));
    let handler = {
        let pcm_bytes = pcm_bytes.clone();
        let pcm_samples = pcm_samples.clone();
        move |pcm: &myy_decoder::DecodedSample| {
            pcm_bytes.fetch_add(pcm.size() as u64, Ordering::Relaxed);
            pcm_samples.fetch_add(pcm.samples as u64, Ordering::Relaxed);
        }
    };

    let mut manager = DecodeManager::open(&MediaSource::from_url(&source), config, handler)
        .map_err(|e| anyhow::anyhow!("打开失败: {}", e))?;
    let info = manager.media_info().clone();
    info!("📋 媒体信息: {}", serde_json::to_string(&info)?);

    let started_at = Instant::now();
    manager.start()?;

    let mut frames: u64 = 0;
    let mut last_pts = f64::NEG_INFINITY;
    loop {
        match manager.get_frame() {
            Some(frame) => {
                if frame.pts() < last_pts {
                    warn!("⚠ 时间戳回退: {:.3}s → {:.3}s", last_pts, frame.pts());
                }
                last_pts = frame.pts();

                if frames == 0 {
                    let (w, h) = ((frame.width() / 2).max(1), (frame.height() / 2).max(1));
                    let image = manager.resize(&frame, w, h)?;
                    info!(
                        "🖼 首帧 {}x{} → {}x{} {:?}, {} 字节",
                        frame.width(),
                        frame.height(),
                        image.width,
                        image.height,
                        image.format,
                        image.size()
                    );
                }
                frames += 1;
            }
            None if manager.is_finished() && manager.frames_pending() == 0 => break,
            None => thread::sleep(Duration::from_millis(5)),
        }
    }

    manager.join()?;

    info!(
        "✅ 完成: {} 视频帧, {} 音频采样（{} 字节 PCM）, 视频时钟 {:.3}s, 音频时钟 {:.3}s, 宽高比 {:.3}, 硬件加速: {}, 用时 {:.2?}",
        frames,
        pcm_samples.load(Ordering::Relaxed),
        pcm_bytes.load(Ordering::Relaxed),
        manager.video_clock(),
        manager.audio_clock(),
        manager.aspect_ratio(),
        manager.hw_type().name(),
        started_at.elapsed()
    );
    Ok(())
}
