//! 网络输出
//!
//! - Packet: 线上格式
//! - Packetizer: 帧 + 触发时间 → 包
//! - Transport: 发送端（UDP 组播 / 内存）

pub mod packet;
pub mod packetizer;
pub mod transport;

pub use packet::{NetworkPacket, PacketError, PacketHeader};
pub use packetizer::{Emitted, Packetizer};
pub use transport::{MemorySink, TransportError, TransportSink, UdpMulticastSink};
