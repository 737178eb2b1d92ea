//! PCM 输入源
//!
//! 播放引擎只认 S16LE 字节流：解码文件或直接读取裸 PCM（stdin / 文件）。

use std::io::Read;
use std::path::Path;

use crate::audio::AudioFormat;

use super::decoder::{AudioDecoder, AudioInfo, DecodeError};

/// 每次读取的裸 PCM 字节数
const RAW_CHUNK_BYTES: usize = 4096;

/// S16LE 字节源
pub trait PcmSource: Send {
    /// 源的音频格式（总是 S16）
    fn format(&self) -> AudioFormat;

    /// 读取下一块 S16LE 字节，空切片表示结束
    fn read_chunk(&mut self) -> Result<&[u8], DecodeError>;

    /// Seek 到指定时间（秒）
    fn seek(&mut self, _time_secs: f64) -> Result<(), DecodeError> {
        Err(DecodeError::NotSeekable)
    }

    /// 总时长（未知时为 None）
    fn duration_secs(&self) -> Option<f64> {
        None
    }
}

/// 解码文件作为 PCM 源
pub struct DecodedSource {
    decoder: AudioDecoder,
    format: AudioFormat,
    bytes: Vec<u8>,
}

impl DecodedSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let decoder = AudioDecoder::open(path)?;
        let info = decoder.info();
        let format = AudioFormat::s16(info.channels as u16, info.sample_rate);
        Ok(Self {
            decoder,
            format,
            bytes: Vec::new(),
        })
    }

    pub fn info(&self) -> &AudioInfo {
        self.decoder.info()
    }
}

impl PcmSource for DecodedSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read_chunk(&mut self) -> Result<&[u8], DecodeError> {
        let samples = self.decoder.decode_next_s16()?;
        self.bytes.clear();
        self.bytes.reserve(samples.len() * 2);
        for s in samples {
            self.bytes.extend_from_slice(&s.to_le_bytes());
        }
        Ok(&self.bytes)
    }

    fn seek(&mut self, time_secs: f64) -> Result<(), DecodeError> {
        self.decoder.seek(time_secs)
    }

    fn duration_secs(&self) -> Option<f64> {
        self.decoder.info().duration_secs
    }
}

/// 裸 S16LE 源，格式由调用方指定
pub struct RawPcmSource<R> {
    reader: R,
    format: AudioFormat,
    buffer: Vec<u8>,
}

impl<R: Read + Send> RawPcmSource<R> {
    pub fn new(reader: R, format: AudioFormat) -> Self {
        Self {
            reader,
            format,
            buffer: vec![0; RAW_CHUNK_BYTES],
        }
    }
}

impl<R: Read + Send> PcmSource for RawPcmSource<R> {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn read_chunk(&mut self) -> Result<&[u8], DecodeError> {
        loop {
            match self.reader.read(&mut self.buffer) {
                Ok(n) => return Ok(&self.buffer[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DecodeError::Read(e)),
            }
        }
    }
}
