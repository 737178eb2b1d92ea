//! 音频文件解码器
//!
//! 使用 symphonia 解码 FLAC, WAV, AIFF, MP3，统一输出交织的 16-bit 样本。
//! 采样率和声道数保持源文件原样，不做重采样或混音：
//! 与输出格式不一致时由输出端在 open() 时拒绝。

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

/// 解码错误
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// 文件打开失败
    #[error("failed to open file: {0}")]
    FileOpen(std::io::Error),
    /// 读取失败
    #[error("read failed: {0}")]
    Read(std::io::Error),
    #[error("unsupported audio format")]
    UnsupportedFormat,
    #[error("no audio track found")]
    NoAudioTrack,
    #[error("failed to create decoder: {0}")]
    DecoderCreation(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("seek failed: {0}")]
    SeekFailed(String),
    /// 输入源不支持 seek（管道、裸 PCM）
    #[error("source is not seekable")]
    NotSeekable,
}

/// 音频文件信息
#[derive(Debug, Clone)]
pub struct AudioInfo {
    /// 采样率
    pub sample_rate: u32,
    /// 声道数
    pub channels: u32,
    /// 位深度（原始格式）
    pub bit_depth: Option<u32>,
    /// 总帧数（如果已知）
    pub total_frames: Option<u64>,
    /// 总时长（秒）
    pub duration_secs: Option<f64>,
    /// 格式名称
    pub format: String,
    /// 编解码器名称
    pub codec: String,
}

/// 音频文件解码器
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: AudioInfo,
    /// 交织 i16 缓冲区，按需扩容
    sample_buffer: Option<SampleBuffer<i16>>,
}

impl AudioDecoder {
    /// 打开音频文件，扩展名作为格式提示
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(DecodeError::FileOpen)?;
        let extension = path.extension().and_then(|e| e.to_str());
        Self::from_media(Box::new(file), extension)
    }

    /// 从任意媒体源探测并打开（如不可 seek 的管道）
    pub fn from_media(
        media: Box<dyn MediaSource>,
        extension: Option<&str>,
    ) -> Result<Self, DecodeError> {
        let mss = MediaSourceStream::new(media, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|_| DecodeError::UnsupportedFormat)?;
        let reader = probed.format;

        // 第一个可解码的轨道
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        let params = &track.codec_params;
        let sample_rate = params.sample_rate.ok_or(DecodeError::NoAudioTrack)?;

        let codecs = symphonia::default::get_codecs();
        let info = AudioInfo {
            sample_rate,
            channels: params.channels.map_or(2, |c| c.count() as u32),
            bit_depth: params.bits_per_sample,
            total_frames: params.n_frames,
            duration_secs: params.n_frames.map(|n| n as f64 / sample_rate as f64),
            format: extension.map_or_else(|| "Unknown".to_string(), str::to_uppercase),
            codec: codecs
                .get_codec(params.codec)
                .map_or_else(|| "Unknown".to_string(), |c| c.short_name.to_string()),
        };

        let decoder = codecs
            .make(params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecoderCreation(e.to_string()))?;
        let track_id = track.id;

        Ok(Self {
            reader,
            decoder,
            track_id,
            info,
            sample_buffer: None,
        })
    }

    /// 获取音频信息
    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    /// 解码下一块数据，返回交织的 i16 样本
    ///
    /// 高位深源截断到 16-bit，浮点源缩放到 i16 范围。
    /// 返回空切片表示文件结束
    pub fn decode_next_s16(&mut self) -> Result<&[i16], DecodeError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(&[]); // EOF
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            // 跳过非目标轨道
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    // 跳过损坏的帧
                    log::debug!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let needs_alloc = self
                .sample_buffer
                .as_ref()
                .map_or(true, |b| b.capacity() < decoded.capacity() * spec.channels.count());
            if needs_alloc {
                self.sample_buffer = None;
            }

            let buffer = self
                .sample_buffer
                .get_or_insert_with(|| SampleBuffer::new(capacity, spec));
            buffer.copy_interleaved_ref(decoded);
            return Ok(buffer.samples());
        }
    }

    /// Seek 到指定时间（秒）
    pub fn seek(&mut self, time_secs: f64) -> Result<(), DecodeError> {
        let seek_to = SeekTo::Time {
            time: Time::new(time_secs as u64, time_secs.fract()),
            track_id: Some(self.track_id),
        };

        self.reader
            .seek(SeekMode::Accurate, seek_to)
            .map_err(|e| DecodeError::SeekFailed(e.to_string()))?;

        // 重置解码器状态
        self.decoder.reset();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// 最小 16-bit PCM WAV
    fn write_wav(path: &Path, channels: u16, sample_rate: u32, samples: &[i16]) {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        File::create(path).unwrap().write_all(&bytes).unwrap();
    }

    #[test]
    fn test_decode_wav_s16() {
        let path = std::env::temp_dir().join(format!("mcast-decode-{}.wav", std::process::id()));
        let samples: Vec<i16> = (0..2000).map(|i| (i * 16 - 16000) as i16).collect();
        write_wav(&path, 2, 48000, &samples);

        let mut decoder = AudioDecoder::open(&path).unwrap();
        assert_eq!(decoder.info().sample_rate, 48000);
        assert_eq!(decoder.info().channels, 2);
        assert_eq!(decoder.info().format, "WAV");

        let mut decoded = Vec::new();
        loop {
            let chunk = decoder.decode_next_s16().unwrap();
            if chunk.is_empty() {
                break;
            }
            decoded.extend_from_slice(chunk);
        }
        assert_eq!(decoded, samples);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AudioDecoder::open("/nonexistent/file.flac"),
            Err(DecodeError::FileOpen(_))
        ));
    }
}
