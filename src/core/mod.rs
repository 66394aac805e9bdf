// 核心数据结构和类型定义

pub mod types;
pub mod clock;
pub mod cancel;
pub mod config;
pub mod error;

pub use types::*;
pub use clock::*;
pub use cancel::StopToken;
pub use config::DecodeConfig;
pub use error::*;
