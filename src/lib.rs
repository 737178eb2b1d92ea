//! mcast-output Library
//!
//! 组播 PCM 输出：无漂移节拍、定长帧、带可听时间戳的 UDP 包。

pub mod audio;
pub mod config;
pub mod decode;
pub mod engine;
pub mod net;
pub mod output;
