//! 音频核心模块
//!
//! 包含：
//! - Timing: 纳秒时钟
//! - Pacer: 无漂移周期触发
//! - Accumulator: 任意粒度写入拼成固定帧
//! - Format: 音频格式和流参数
//! - Stats: 输出统计

pub mod accumulator;
pub mod format;
pub mod pacer;
pub mod stats;
pub mod timing;

pub use accumulator::{Accepted, FrameAccumulator};
pub use format::{AudioFormat, SampleFormat, StreamConfig};
pub use pacer::{Pacer, PacerState};
pub use stats::{SessionStats, StatsReport};
pub use timing::{Clock, ClockError, ClockSource, ManualClock, Nanos, SystemClock};
