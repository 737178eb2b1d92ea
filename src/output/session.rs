//! 输出会话
//!
//! 生命周期：Closed → open() → Playing ⇄ cancel() → close() → Closed
//!
//! 流资源（Pacer、帧累积器、打包器）只在 Playing 期间存在，
//! 放在 `Option<ActiveStream>` 中，close() 或 open() 失败时自动释放。
//! 会话本身从不睡眠：play() 立即返回，等待时间由 delay() 交给驱动线程。

use std::sync::Arc;
use std::time::Duration;

use crate::audio::{
    AudioFormat, Clock, FrameAccumulator, Nanos, Pacer, SessionStats, StatsReport,
};
use crate::config::MulticastConfig;
use crate::net::{Packetizer, TransportError, TransportSink};

/// 输出错误
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("audio format {requested} not supported (expected {supported})")]
    FormatUnsupported {
        requested: AudioFormat,
        supported: AudioFormat,
    },
    #[error("transmission failed after consuming {consumed} bytes: {source}")]
    Transport {
        /// 本次 play() 已消费的字节数，调用方据此继续推进
        consumed: usize,
        source: TransportError,
    },
    #[error("lifecycle violation: {0}")]
    LifecycleViolation(&'static str),
}

/// Playing 期间持有的流资源
struct ActiveStream<C: Clock> {
    format: AudioFormat,
    pacer: Pacer<C>,
    accumulator: FrameAccumulator,
    /// sync-only 模式下为 None
    packetizer: Option<Packetizer>,
}

/// 组播输出会话
pub struct OutputSession<C: Clock + Clone> {
    config: MulticastConfig,
    clock: C,
    /// Closed 期间由会话保管，open() 时交给打包器
    sink: Option<Box<dyn TransportSink>>,
    stream: Option<ActiveStream<C>>,
    stats: Arc<SessionStats>,
}

impl<C: Clock + Clone> OutputSession<C> {
    /// 创建会话（处于 Closed）
    ///
    /// `config.sync_only` 为 true 或没有发送端时，只做格式协商和节拍，不发送任何包
    pub fn new(config: MulticastConfig, clock: C, sink: Option<Box<dyn TransportSink>>) -> Self {
        let sink = if config.sync_only {
            if sink.is_some() {
                log::debug!("sync-only output: transport sink ignored");
            }
            None
        } else {
            if sink.is_none() {
                log::warn!("No transport sink configured, output runs in sync-only mode");
            }
            sink
        };

        Self {
            config,
            clock,
            sink,
            stream: None,
            stats: Arc::new(SessionStats::new()),
        }
    }

    pub fn config(&self) -> &MulticastConfig {
        &self.config
    }

    /// 是否会发送包（否则为 sync-only）
    pub fn is_transmitting(&self) -> bool {
        match &self.stream {
            Some(stream) => stream.packetizer.is_some(),
            None => self.sink.is_some(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// 当前协商的格式
    pub fn format(&self) -> Option<AudioFormat> {
        self.stream.as_ref().map(|s| s.format)
    }

    /// 统计（可交给监控线程）
    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    pub fn report(&self) -> StatsReport {
        self.stats.report(self.config.period())
    }

    /// 最近一次触发时间
    pub fn last_trigger_time(&self) -> Option<Nanos> {
        self.stream.as_ref().and_then(|s| s.pacer.last_trigger_time())
    }

    /// 打开流
    ///
    /// 格式必须与配置的格式完全一致，否则保持 Closed
    pub fn open(&mut self, format: &AudioFormat) -> Result<(), OutputError> {
        if self.stream.is_some() {
            return Err(violation("open() called on an open output"));
        }

        let supported = self.config.stream.supported_format();
        if *format != supported {
            log::warn!("Rejecting audio format {} (supported: {})", format, supported);
            return Err(OutputError::FormatUnsupported {
                requested: *format,
                supported,
            });
        }

        let period = self.config.period();
        let frame_bytes = self.config.stream.frame_bytes();
        let pacer = Pacer::new(self.clock.clone(), period, self.config.due_time_slot);
        let packetizer = self.sink.take().map(|sink| {
            Packetizer::new(
                sink,
                self.config.stream_id,
                self.config.transmission_gap,
                frame_bytes,
            )
        });

        log::info!(
            "Output opened: {} | {} frames/packet ({} bytes) | period {}ns, due slot {}ns | {}",
            format,
            self.config.stream.block_size,
            frame_bytes,
            period,
            pacer.due_time_slot(),
            if packetizer.is_some() {
                format!("sending to {} as stream {}", self.config.target(), self.config.stream_id)
            } else {
                "sync only".to_string()
            }
        );

        self.stats.reset();
        self.stream = Some(ActiveStream {
            format: *format,
            pacer,
            accumulator: FrameAccumulator::new(frame_bytes),
            packetizer,
        });
        Ok(())
    }

    /// 写入 PCM，返回实际消费的字节数（可能小于 chunk.len()，调用方需循环）
    ///
    /// 帧完成时立即触发 Pacer 并发送。发送失败时返回 `OutputError::Transport`，
    /// 其中带有已消费的字节数；节拍和累积器状态不回滚
    pub fn play(&mut self, chunk: &[u8]) -> Result<usize, OutputError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| violation("play() called on a closed output"))?;

        let accepted = stream.accumulator.accept(chunk);
        self.stats.add_bytes_accepted(accepted.consumed);
        if !accepted.frame_ready {
            return Ok(accepted.consumed);
        }

        let (state, trigger_time) = stream.pacer.trigger_observed();
        self.stats.record_frame(state);

        let sent = match (&mut stream.packetizer, stream.accumulator.frame()) {
            (Some(packetizer), Some(frame)) => Some(packetizer.emit(frame, trigger_time)),
            _ => None,
        };
        stream.accumulator.clear();

        match sent {
            Some(Ok(emitted)) => {
                self.stats.record_sent();
                log::trace!(
                    "Sent packet #{} audible at {}",
                    emitted.sequence,
                    emitted.audible_time
                );
            }
            Some(Err(e)) => {
                self.stats.record_send_failure();
                log::warn!("Failed to send packet: {}", e);
                return Err(OutputError::Transport {
                    consumed: accepted.consumed,
                    source: e,
                });
            }
            None => {}
        }

        Ok(accepted.consumed)
    }

    /// 下一次 play() 之前最多应等待的时间
    pub fn delay(&self) -> Result<Duration, OutputError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| violation("delay() called on a closed output"))?;
        Ok(stream.pacer.sleep_duration())
    }

    /// delay() 的毫秒形式（截断），对应插件框架的轮询单位
    pub fn delay_ms(&self) -> Result<u32, OutputError> {
        Ok(self.delay()?.as_millis().min(u32::MAX as u128) as u32)
    }

    /// 丢弃未完成的帧，Pacer 回到 READY
    pub fn cancel(&mut self) -> Result<(), OutputError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| violation("cancel() called on a closed output"))?;

        if stream.accumulator.pending() > 0 {
            log::debug!(
                "Cancel: dropping {} bytes of partial frame",
                stream.accumulator.pending()
            );
        }
        stream.accumulator.clear();
        stream.pacer.reset();
        self.stats.record_cancel();
        Ok(())
    }

    /// 释放流资源，回到 Closed。对已关闭的会话无效果
    pub fn close(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        if let Some(packetizer) = stream.packetizer {
            log::info!("Output closed after {} packets", packetizer.sequence());
            self.sink = Some(packetizer.into_sink());
        } else {
            log::info!("Output closed");
        }
    }
}

/// 在错误状态下调用：记录并返回前置条件错误
///
/// 不断言：release 和 debug 构建行为一致，调用方可据此恢复
fn violation(what: &'static str) -> OutputError {
    log::error!("Precondition failed: {}", what);
    OutputError::LifecycleViolation(what)
}
