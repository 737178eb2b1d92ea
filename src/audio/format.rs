//! 音频格式
//!
//! 输出只接受一种格式：16-bit 有符号小端交织 PCM，声道数和采样率由配置决定。
//! Open 时格式必须与支持的格式完全一致，不做任何转换。

use std::fmt;

/// 样本格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// 16-bit signed little-endian
    S16,
    /// 24-bit signed（packed 3 字节）
    S24,
    /// 32-bit signed
    S32,
    /// 32-bit float
    F32,
}

impl SampleFormat {
    /// 每样本字节数
    #[inline]
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::S24 => 3,
            Self::S32 | Self::F32 => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::S16 => "s16",
            Self::S24 => "s24",
            Self::S32 => "s32",
            Self::F32 => "f32",
        };
        f.write_str(name)
    }
}

/// 音频格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioFormat {
    /// 创建新的音频格式
    pub fn new(sample_format: SampleFormat, channels: u16, sample_rate: u32) -> Self {
        Self {
            sample_format,
            channels,
            sample_rate,
        }
    }

    /// 16-bit 格式
    pub fn s16(channels: u16, sample_rate: u32) -> Self {
        Self::new(SampleFormat::S16, channels, sample_rate)
    }

    /// 每样本帧（所有声道各一个样本）的字节数
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels as usize
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.sample_rate, self.sample_format, self.channels)
    }
}

/// 流参数：块大小 + 唯一支持的格式
///
/// 每个网络包承载 block_size 个样本帧
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub block_size: u32,
    pub channels: u16,
    pub sample_rate: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            block_size: 256,
            channels: 2,
            sample_rate: 48000,
        }
    }
}

impl StreamConfig {
    /// 唯一支持的输入格式
    pub fn supported_format(&self) -> AudioFormat {
        AudioFormat::s16(self.channels, self.sample_rate)
    }

    /// 是否与支持的格式完全一致
    pub fn accepts(&self, format: &AudioFormat) -> bool {
        *format == self.supported_format()
    }

    /// 每个帧（网络包负载）的样本数：block_size * channels
    #[inline]
    pub fn samples_per_frame(&self) -> usize {
        self.block_size as usize * self.channels as usize
    }

    /// 每个帧（网络包负载）的字节数
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() * SampleFormat::S16.bytes_per_sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        let config = StreamConfig::default();
        assert_eq!(config.samples_per_frame(), 512);
        assert_eq!(config.frame_bytes(), 1024);

        let format = config.supported_format();
        assert_eq!(format.bytes_per_frame(), 4);
    }

    #[test]
    fn test_exact_match_required() {
        let config = StreamConfig::default();
        assert!(config.accepts(&AudioFormat::s16(2, 48000)));
        assert!(!config.accepts(&AudioFormat::s16(1, 48000)));
        assert!(!config.accepts(&AudioFormat::s16(2, 44100)));
        assert!(!config.accepts(&AudioFormat::new(SampleFormat::S24, 2, 48000)));
    }

    #[test]
    fn test_display() {
        assert_eq!(AudioFormat::s16(2, 48000).to_string(), "48000:s16:2");
    }
}
