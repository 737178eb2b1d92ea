//! 网络包格式
//!
//! 所有字段小端，与主机字节序无关：
//!
//! ```text
//! offset  size  field
//!      0     4  magic "SSND"
//!      4     4  protocol_version (u32)
//!      8     4  stream_id (u32)
//!     12     4  sequence (u32, 从 1 开始, 2^32 回绕到 0)
//!     16     8  audible_time (i64, 纳秒)
//!     24     n  payload: block_size * channels 个 i16 样本
//! ```

use crate::audio::Nanos;

pub const MAGIC: [u8; 4] = *b"SSND";
pub const PROTOCOL_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 24;

/// 包解析错误
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),
    #[error("bad magic {0:?}")]
    BadMagic([u8; 4]),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
    #[error("payload length {0} is not a whole number of samples")]
    OddPayload(usize),
}

/// 包头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub stream_id: u32,
    pub sequence: u32,
    pub audible_time: Nanos,
}

/// 网络包（负载借用自帧或收到的 datagram）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkPacket<'a> {
    pub header: PacketHeader,
    pub payload: &'a [u8],
}

impl<'a> NetworkPacket<'a> {
    pub fn new(header: PacketHeader, payload: &'a [u8]) -> Self {
        Self { header, payload }
    }

    /// 编码后的总长度
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// 编码到 `out`（先清空），复用调用方的缓冲区避免每包分配
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.encoded_len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
        out.extend_from_slice(&self.header.stream_id.to_le_bytes());
        out.extend_from_slice(&self.header.sequence.to_le_bytes());
        out.extend_from_slice(&self.header.audible_time.to_le_bytes());
        out.extend_from_slice(self.payload);
    }

    /// 解析 datagram
    pub fn decode(datagram: &'a [u8]) -> Result<Self, PacketError> {
        if datagram.len() < HEADER_LEN {
            return Err(PacketError::TooShort(datagram.len()));
        }

        let magic = read_array::<4>(datagram, 0);
        if magic != MAGIC {
            return Err(PacketError::BadMagic(magic));
        }

        let version = u32::from_le_bytes(read_array(datagram, 4));
        if version != PROTOCOL_VERSION {
            return Err(PacketError::UnsupportedVersion(version));
        }

        let payload = &datagram[HEADER_LEN..];
        if payload.len() % 2 != 0 {
            return Err(PacketError::OddPayload(payload.len()));
        }

        Ok(Self {
            header: PacketHeader {
                stream_id: u32::from_le_bytes(read_array(datagram, 8)),
                sequence: u32::from_le_bytes(read_array(datagram, 12)),
                audible_time: i64::from_le_bytes(read_array(datagram, 16)),
            },
            payload,
        })
    }

    /// 负载解释为交织的 i16 样本
    pub fn samples(&self) -> impl Iterator<Item = i16> + 'a {
        self.payload
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
    }
}

/// 调用方已检查长度
#[inline]
fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}
