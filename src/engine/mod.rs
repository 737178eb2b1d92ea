//! 播放引擎
//!
//! 把 PCM 源接到输出插件上。
//! 输出线程循环 play() → delay() → sleep，节拍完全由输出端的 Pacer 决定；
//! 控制线程只通过原子标志和 park/unpark 与它通信。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{AudioFormat, StatsReport};
use crate::decode::{DecodeError, PcmSource};
use crate::output::{AudioOutput, OutputError};

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// 引擎错误
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("output error: {0}")]
    Output(#[from] OutputError),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("failed to spawn output thread: {0}")]
    Spawn(std::io::Error),
}

/// 播放引擎统计
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// 已交给输出端的字节数
    pub bytes_played: u64,
    /// 当前播放时间（秒）
    pub position_secs: f64,
}

/// 没有待处理的 seek 请求
const NO_SEEK: u64 = u64::MAX;

/// 输出线程共享状态
///
/// 完全基于原子操作
struct OutputState {
    /// 是否应该继续运行
    running: AtomicBool,
    /// 是否暂停
    paused: AtomicBool,
    /// 输入源已读完且全部交给输出端
    finished: AtomicBool,
    /// 输出线程因输入或输出错误提前退出
    failed: AtomicBool,
    /// 已交给输出端的字节数
    bytes_played: AtomicU64,
    /// 待处理的 seek 目标（毫秒），NO_SEEK 表示无
    seek_ms: AtomicU64,
}

impl OutputState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            bytes_played: AtomicU64::new(0),
            seek_ms: AtomicU64::new(NO_SEEK),
        }
    }
}

/// 播放引擎
pub struct Engine {
    state: PlaybackState,
    /// 空闲时由引擎持有，播放期间在输出线程里
    output: Option<Box<dyn AudioOutput>>,
    output_thread: Option<JoinHandle<Box<dyn AudioOutput>>>,
    output_state: Arc<OutputState>,
    current_format: Option<AudioFormat>,
    duration_secs: Option<f64>,
    last_report: Option<StatsReport>,
}

impl Engine {
    /// 创建新引擎
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            state: PlaybackState::Stopped,
            output: Some(output),
            output_thread: None,
            output_state: Arc::new(OutputState::new()),
            current_format: None,
            duration_secs: None,
            last_report: None,
        }
    }

    /// 打开输出并开始播放
    ///
    /// 格式协商在调用线程完成：输出端拒绝时直接返回错误，引擎保持 Stopped
    pub fn play(&mut self, source: Box<dyn PcmSource>) -> Result<(), EngineError> {
        // 如果正在播放，先停止
        if self.state != PlaybackState::Stopped {
            self.stop()?;
        }

        let mut output = self
            .output
            .take()
            .ok_or(EngineError::InvalidState("output lost by a previous playback"))?;

        let format = source.format();
        if let Err(e) = output.open(&format) {
            self.output = Some(output);
            return Err(e.into());
        }

        log::info!(
            "Playing {} through \"{}\" output{}",
            format,
            output.name(),
            source
                .duration_secs()
                .map(|d| format!(", duration {:.1}s", d))
                .unwrap_or_default()
        );

        self.output_state.running.store(true, Ordering::Release);
        self.output_state.paused.store(false, Ordering::Release);
        self.output_state.finished.store(false, Ordering::Release);
        self.output_state.failed.store(false, Ordering::Release);
        self.output_state.bytes_played.store(0, Ordering::Release);
        self.output_state.seek_ms.store(NO_SEEK, Ordering::Release);

        let state = Arc::clone(&self.output_state);
        let duration_secs = source.duration_secs();
        let spawned = thread::Builder::new()
            .name("output".to_string())
            .spawn(move || Self::output_thread_main(source, output, state));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                // 闭包连同输出一起被丢弃
                self.output_state.running.store(false, Ordering::Release);
                return Err(EngineError::Spawn(e));
            }
        };

        self.output_thread = Some(handle);
        self.current_format = Some(format);
        self.duration_secs = duration_secs;
        self.last_report = None;
        self.state = PlaybackState::Playing;

        Ok(())
    }

    /// 输出线程主函数，结束时把输出交还给引擎
    fn output_thread_main(
        mut source: Box<dyn PcmSource>,
        mut output: Box<dyn AudioOutput>,
        state: Arc<OutputState>,
    ) -> Box<dyn AudioOutput> {
        let bytes_per_frame = source.format().bytes_per_frame() as u64;
        let bytes_per_sec = bytes_per_frame * source.format().sample_rate as u64;

        // 当前块及其已提交的偏移
        let mut pending: Vec<u8> = Vec::new();
        let mut offset = 0usize;

        log::debug!("Output thread started");

        while state.running.load(Ordering::Acquire) {
            if state.paused.load(Ordering::Acquire) {
                // 暂停期间不出包，恢复后从 READY 重新起拍
                if let Err(e) = output.cancel() {
                    log::warn!("Cancel on pause failed: {}", e);
                }
                // 如果 unpark 在 park 之前调用，下次 park 立即返回（无丢失唤醒）
                while state.paused.load(Ordering::Acquire) && state.running.load(Ordering::Acquire)
                {
                    thread::park();
                }
                continue;
            }

            let seek_ms = state.seek_ms.swap(NO_SEEK, Ordering::AcqRel);
            if seek_ms != NO_SEEK {
                match source.seek(seek_ms as f64 / 1000.0) {
                    Ok(()) => {
                        if let Err(e) = output.cancel() {
                            log::warn!("Cancel on seek failed: {}", e);
                        }
                        pending.clear();
                        offset = 0;
                        let position = seek_ms * bytes_per_sec / 1000;
                        state.bytes_played.store(
                            position - position % bytes_per_frame.max(1),
                            Ordering::Release,
                        );
                        log::info!("Seeked to {:.3}s", seek_ms as f64 / 1000.0);
                    }
                    Err(e) => log::warn!("Seek ignored: {}", e),
                }
            }

            if offset >= pending.len() {
                match source.read_chunk() {
                    Ok([]) => {
                        state.finished.store(true, Ordering::Release);
                        log::info!("Source reached end of stream");
                        break;
                    }
                    Ok(chunk) => {
                        pending.clear();
                        pending.extend_from_slice(chunk);
                        offset = 0;
                    }
                    Err(e) => {
                        log::error!("Source error: {}", e);
                        state.failed.store(true, Ordering::Release);
                        break;
                    }
                }
            }

            let consumed = match output.play(&pending[offset..]) {
                Ok(n) => n,
                Err(OutputError::Transport { consumed, source }) => {
                    // 丢一个包，节拍照常
                    log::debug!("Packet lost: {}", source);
                    consumed
                }
                Err(e) => {
                    log::error!("Output error: {}", e);
                    state.failed.store(true, Ordering::Release);
                    break;
                }
            };
            offset += consumed;
            state
                .bytes_played
                .fetch_add(consumed as u64, Ordering::Relaxed);

            match output.delay() {
                Ok(wait) if !wait.is_zero() => thread::sleep(wait),
                Ok(_) => {}
                Err(e) => {
                    log::error!("Output error: {}", e);
                    state.failed.store(true, Ordering::Release);
                    break;
                }
            }
        }

        log::debug!("Output thread finished");
        output
    }

    /// 停止播放：丢弃未完成的帧并关闭输出
    pub fn stop(&mut self) -> Result<(), EngineError> {
        self.output_state.running.store(false, Ordering::Release);
        // 解除暂停状态（如果有），确保输出线程能退出
        self.output_state.paused.store(false, Ordering::Release);

        if let Some(thread) = self.output_thread.take() {
            thread.thread().unpark();
            match thread.join() {
                Ok(output) => self.output = Some(output),
                Err(_) => log::error!("Output thread panicked"),
            }
        }

        if let Some(output) = self.output.as_mut() {
            if self.state != PlaybackState::Stopped {
                if let Err(e) = output.cancel() {
                    log::debug!("Cancel on stop: {}", e);
                }
                output.close();
                self.last_report = output.report();
                log::info!("Playback stopped");
            }
        }

        self.state = PlaybackState::Stopped;
        self.current_format = None;
        self.duration_secs = None;

        Ok(())
    }

    /// 暂停/恢复
    pub fn toggle_pause(&mut self) -> Result<(), EngineError> {
        match self.state {
            PlaybackState::Playing => {
                self.output_state.paused.store(true, Ordering::Release);
                self.state = PlaybackState::Paused;
                log::info!("Paused");
            }
            PlaybackState::Paused => {
                self.output_state.paused.store(false, Ordering::Release);
                // 立即唤醒 park 中的输出线程
                if let Some(ref handle) = self.output_thread {
                    handle.thread().unpark();
                }
                self.state = PlaybackState::Playing;
                log::info!("Resumed");
            }
            PlaybackState::Stopped => {
                return Err(EngineError::InvalidState("Cannot pause when stopped"));
            }
        }
        Ok(())
    }

    /// 请求 seek，由输出线程在下一轮处理（丢弃未完成的帧）
    pub fn seek(&mut self, position_secs: f64) -> Result<(), EngineError> {
        if self.state == PlaybackState::Stopped {
            return Err(EngineError::InvalidState("Cannot seek when stopped"));
        }
        let ms = (position_secs.max(0.0) * 1000.0) as u64;
        self.output_state
            .seek_ms
            .store(ms.min(NO_SEEK - 1), Ordering::Release);
        if let Some(ref handle) = self.output_thread {
            handle.thread().unpark();
        }
        Ok(())
    }

    /// 获取当前状态
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// 获取统计信息
    pub fn stats(&self) -> EngineStats {
        let bytes_played = self.output_state.bytes_played.load(Ordering::Relaxed);
        let bytes_per_sec = self
            .current_format
            .map(|f| f.bytes_per_frame() as u64 * f.sample_rate as u64)
            .unwrap_or(0);
        let position_secs = if bytes_per_sec == 0 {
            0.0
        } else {
            bytes_played as f64 / bytes_per_sec as f64
        };

        EngineStats {
            bytes_played,
            position_secs,
        }
    }

    /// 当前播放的格式
    pub fn current_format(&self) -> Option<AudioFormat> {
        self.current_format
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    /// 检查是否正在播放
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// 检查输入是否已全部交给输出端
    pub fn is_track_finished(&self) -> bool {
        self.output_state.finished.load(Ordering::Acquire)
    }

    /// 输出线程是否因错误提前退出
    pub fn is_failed(&self) -> bool {
        self.output_state.failed.load(Ordering::Acquire)
    }

    /// 输出线程已退出（正常结束或出错），只剩 stop() 收尾
    pub fn has_ended(&self) -> bool {
        self.is_track_finished() || self.is_failed()
    }

    /// 上一次 stop() 时的输出统计
    pub fn last_report(&self) -> Option<&StatsReport> {
        self.last_report.as_ref()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
