// 解码核心模块

pub mod demuxer;
pub mod demuxer_source;  // 数据包来源抽象
pub mod demuxer_thread;  // Demuxer 线程管理
pub mod packet_queue;
pub mod stream;
pub mod decoder;
pub mod hw_decoder;
pub mod transform;
pub mod manager;

pub use demuxer::Demuxer;
pub use demuxer_source::{PacketSource, ReadOutcome};
pub use demuxer_thread::{DemuxExit, DemuxerThread, PacketRoute};
pub use packet_queue::{packet_queue, PacketReceiver, PacketSender, Pop, PushError};
pub use stream::{LoopExit, StreamDecoder, StreamState, UnitDecoder};
pub use decoder::{AudioStreamDecoder, FrameResidency, SampleHandler, VideoStreamDecoder};
pub use hw_decoder::{HWAccelType, HardwareContext, HardwareDeviceResolver};
pub use transform::{FrameTransform, SampleTransform, ScaledImage};
pub use manager::DecodeManager;
