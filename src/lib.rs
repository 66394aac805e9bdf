//! 播放器解码核心
//!
//! 解封装、软/硬件视频解码、音频重采样、按需缩放以及流时钟。
//! 入口是 [`DecodeManager`]：`open` 同步完成所有打开工作，`start` 启动
//! 解封装线程和音视频解码线程，视频帧通过 `get_frame` 非阻塞取出，
//! 音频 PCM 通过打开时传入的回调交付。

pub mod core;
pub mod player;

pub use crate::core::{
    DecodeConfig, DecodedFrame, DecodedSample, MediaInfo, MediaSource, OutputPixelFormat, PlayerError,
    Result, StopToken, StreamProtocol,
};
pub use crate::player::{DecodeManager, HWAccelType, ScaledImage};
