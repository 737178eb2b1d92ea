//! 输出统计
//!
//! 由驱动线程在 play() 中更新，监控线程可通过 Arc 随时读取。
//! 所有计数器都是原子的，Relaxed 即可（只做统计，不做同步）

use std::sync::atomic::{AtomicU64, Ordering};

use super::pacer::PacerState;

/// 会话统计收集器
#[derive(Debug, Default)]
pub struct SessionStats {
    bytes_accepted: AtomicU64,
    frames_completed: AtomicU64,
    packets_sent: AtomicU64,
    send_failures: AtomicU64,

    // 触发时 Pacer 所处状态
    on_time_triggers: AtomicU64,
    overdue_triggers: AtomicU64,
    resyncs: AtomicU64,

    cancels: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_bytes_accepted(&self, bytes: usize) {
        self.bytes_accepted.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// 记录一帧完成，以及触发时的 Pacer 状态
    #[inline]
    pub fn record_frame(&self, state: PacerState) {
        self.frames_completed.fetch_add(1, Ordering::Relaxed);
        let counter = match state {
            PacerState::Waiting => &self.on_time_triggers,
            PacerState::Overdue => &self.overdue_triggers,
            PacerState::Ready | PacerState::Aborted => &self.resyncs,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cancel(&self) {
        self.cancels.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn frames_completed(&self) -> u64 {
        self.frames_completed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn resyncs(&self) -> u64 {
        self.resyncs.load(Ordering::Relaxed)
    }

    /// 生成报告
    pub fn report(&self, period_ns: i64) -> StatsReport {
        StatsReport {
            period_ns,
            bytes_accepted: self.bytes_accepted.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            on_time_triggers: self.on_time_triggers.load(Ordering::Relaxed),
            overdue_triggers: self.overdue_triggers.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            cancels: self.cancels.load(Ordering::Relaxed),
        }
    }

    /// 重置统计
    pub fn reset(&self) {
        for counter in [
            &self.bytes_accepted,
            &self.frames_completed,
            &self.packets_sent,
            &self.send_failures,
            &self.on_time_triggers,
            &self.overdue_triggers,
            &self.resyncs,
            &self.cancels,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 统计报告
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub period_ns: i64,
    pub bytes_accepted: u64,
    pub frames_completed: u64,
    pub packets_sent: u64,
    pub send_failures: u64,
    pub on_time_triggers: u64,
    pub overdue_triggers: u64,
    pub resyncs: u64,
    pub cancels: u64,
}

impl StatsReport {
    /// 按帧数计算的已输出时长（秒）
    pub fn streamed_secs(&self) -> f64 {
        self.frames_completed as f64 * self.period_ns as f64 / 1_000_000_000.0
    }
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Output Statistics")?;
        writeln!(f, "=================")?;
        writeln!(f, "Bytes accepted: {}", self.bytes_accepted)?;
        writeln!(
            f,
            "Frames completed: {} ({:.2} s @ {:.3} ms/frame)",
            self.frames_completed,
            self.streamed_secs(),
            self.period_ns as f64 / 1_000_000.0
        )?;
        writeln!(f, "Packets sent: {}", self.packets_sent)?;
        writeln!(f, "Send failures: {}", self.send_failures)?;
        writeln!(f)?;

        writeln!(f, "Pacing:")?;
        writeln!(f, "  On time: {}", self.on_time_triggers)?;
        writeln!(f, "  Overdue: {}", self.overdue_triggers)?;
        writeln!(f, "  Resyncs: {}", self.resyncs)?;
        writeln!(f, "Cancels: {}", self.cancels)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_classification() {
        let stats = SessionStats::new();
        stats.record_frame(PacerState::Ready);
        stats.record_frame(PacerState::Waiting);
        stats.record_frame(PacerState::Overdue);
        stats.record_frame(PacerState::Aborted);

        let report = stats.report(5_333_333);
        assert_eq!(report.frames_completed, 4);
        assert_eq!(report.on_time_triggers, 1);
        assert_eq!(report.overdue_triggers, 1);
        assert_eq!(report.resyncs, 2);
    }

    #[test]
    fn test_reset_and_display() {
        let stats = SessionStats::new();
        stats.add_bytes_accepted(1024);
        stats.record_sent();
        stats.record_send_failure();
        stats.record_cancel();

        let text = stats.report(1_000_000).to_string();
        assert!(text.contains("Bytes accepted: 1024"));
        assert!(text.contains("Send failures: 1"));

        stats.reset();
        let report = stats.report(1_000_000);
        assert_eq!(report.bytes_accepted, 0);
        assert_eq!(report.packets_sent, 0);
        assert_eq!(report.cancels, 0);
    }
}
