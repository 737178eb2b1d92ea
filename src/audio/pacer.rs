//! 节拍器（Pacer）
//!
//! 每个周期产生一次触发，长期平均速率严格锁定在 period 上：
//! - 按时触发（WAITING/OVERDUE）时 last_trigger_time 精确累加 period，不重新锚定到 now，
//!   调度抖动不会累积成相位漂移
//! - 从未触发（READY）或已经脱节（ABORTED）时重新同步到 now，
//!   不会为了追赶错过的周期而连续突发触发
//!
//! Pacer 本身从不睡眠，等待时间通过 `sleep_time()` 交给调用方

use std::time::Duration;

use super::timing::{Clock, Nanos, NANOS_PER_MILLI, NANOS_PER_SEC};

/// 默认容差上限：1ms
const MAX_DEFAULT_DUE_TIME_SLOT: Nanos = NANOS_PER_MILLI;

/// 节拍状态（每次查询时由经过时间推导，不存储）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    /// 从未触发
    Ready,
    /// 本周期尚未到期
    Waiting,
    /// 已到期，仍在容差窗口内
    Overdue,
    /// 超出容差窗口，调度已脱节
    Aborted,
}

/// 由 (elapsed, period, due_time_slot) 推导状态
///
/// 纯函数，不依赖时钟。READY 由调用方（是否触发过）决定，这里只处理已触发的情况
#[inline]
pub fn classify(elapsed: Nanos, period: Nanos, due_time_slot: Nanos) -> PacerState {
    if elapsed < period {
        PacerState::Waiting
    } else if elapsed > period + due_time_slot {
        PacerState::Aborted
    } else {
        PacerState::Overdue
    }
}

/// 每帧周期（纳秒）：1e9 * block_size / sample_rate，整数截断
pub fn period_for(block_size: u32, sample_rate: u32) -> Nanos {
    NANOS_PER_SEC * block_size as Nanos / sample_rate as Nanos
}

/// 默认容差：min(1ms, period / 2)
pub fn default_due_time_slot(period: Nanos) -> Nanos {
    MAX_DEFAULT_DUE_TIME_SLOT.min(period / 2)
}

/// 周期触发状态机
#[derive(Debug)]
pub struct Pacer<C: Clock> {
    clock: C,
    period: Nanos,
    due_time_slot: Nanos,
    last_trigger_time: Option<Nanos>,
}

impl<C: Clock> Pacer<C> {
    /// 创建 Pacer
    ///
    /// `due_time_slot` 为 None 时使用 `default_due_time_slot(period)`
    pub fn new(clock: C, period: Nanos, due_time_slot: Option<Nanos>) -> Self {
        assert!(period > 0, "pacer period must be positive");
        let due_time_slot = due_time_slot.unwrap_or_else(|| default_due_time_slot(period));
        debug_assert!(due_time_slot >= 0);

        Self {
            clock,
            period,
            due_time_slot,
            last_trigger_time: None,
        }
    }

    #[inline]
    pub fn period(&self) -> Nanos {
        self.period
    }

    #[inline]
    pub fn due_time_slot(&self) -> Nanos {
        self.due_time_slot
    }

    /// 最近一次触发时间，None 表示从未触发
    #[inline]
    pub fn last_trigger_time(&self) -> Option<Nanos> {
        self.last_trigger_time
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// 当前状态
    pub fn state(&self) -> PacerState {
        self.observe(self.clock.now_ns()).0
    }

    /// 在给定时刻观察状态，同时返回距离下一次到期的纳秒数
    fn observe(&self, now: Nanos) -> (PacerState, Nanos) {
        let Some(last) = self.last_trigger_time else {
            return (PacerState::Ready, 0);
        };
        let elapsed = now - last;
        match classify(elapsed, self.period, self.due_time_slot) {
            // 提前触发后 elapsed 可能为负，此时需要等待超过一个周期
            PacerState::Waiting => (PacerState::Waiting, self.period - elapsed),
            state => (state, 0),
        }
    }

    /// 调用方在下一次触发前应等待的纳秒数，从不为负
    pub fn sleep_time(&self) -> Nanos {
        self.observe(self.clock.now_ns()).1
    }

    /// `sleep_time()` 的 Duration 形式
    pub fn sleep_duration(&self) -> Duration {
        Duration::from_nanos(self.sleep_time() as u64)
    }

    /// 推进调度，返回新的 last_trigger_time
    pub fn trigger(&mut self) -> Nanos {
        self.trigger_observed().1
    }

    /// 推进调度，同时返回触发时所处的状态
    pub fn trigger_observed(&mut self) -> (PacerState, Nanos) {
        let now = self.clock.now_ns();
        let (state, _) = self.observe(now);

        let next = match (state, self.last_trigger_time) {
            (PacerState::Waiting | PacerState::Overdue, Some(last)) => last + self.period,
            _ => now,
        };

        if state == PacerState::Aborted {
            log::debug!(
                "Pacer lapsed ({}ns since last trigger, period {}ns), resyncing",
                self.last_trigger_time.map(|last| now - last).unwrap_or(0),
                self.period
            );
        }

        self.last_trigger_time = Some(next);
        (state, next)
    }

    /// 回到 READY（等同于从未触发）
    pub fn reset(&mut self) {
        self.last_trigger_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::timing::ManualClock;

    const PERIOD: Nanos = 5_333_333; // 256 frames @ 48kHz

    fn pacer() -> (Pacer<ManualClock>, ManualClock) {
        let clock = ManualClock::new(1_000_000_000);
        (Pacer::new(clock.clone(), PERIOD, None), clock)
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(0, 100, 10), PacerState::Waiting);
        assert_eq!(classify(99, 100, 10), PacerState::Waiting);
        assert_eq!(classify(100, 100, 10), PacerState::Overdue);
        assert_eq!(classify(110, 100, 10), PacerState::Overdue);
        assert_eq!(classify(111, 100, 10), PacerState::Aborted);
        // 提前触发后 last_trigger_time 在 now 之后
        assert_eq!(classify(-5, 100, 10), PacerState::Waiting);
    }

    #[test]
    fn test_period_and_default_slot() {
        assert_eq!(period_for(256, 48000), PERIOD);
        assert_eq!(default_due_time_slot(PERIOD), NANOS_PER_MILLI);
        // 短周期：取 period / 2
        assert_eq!(default_due_time_slot(800_000), 400_000);
    }

    #[test]
    fn test_ready_state() {
        let (pacer, _) = pacer();
        assert_eq!(pacer.state(), PacerState::Ready);
        assert_eq!(pacer.sleep_time(), 0);
        assert_eq!(pacer.last_trigger_time(), None);
    }

    #[test]
    fn test_state_progression() {
        let (mut pacer, clock) = pacer();

        let t0 = pacer.trigger();
        assert_eq!(t0, clock.now_ns());
        assert_eq!(pacer.state(), PacerState::Waiting);
        assert_eq!(pacer.sleep_time(), PERIOD);

        clock.advance(PERIOD / 2);
        assert_eq!(pacer.state(), PacerState::Waiting);
        assert_eq!(pacer.sleep_time(), PERIOD - PERIOD / 2);

        clock.advance(PERIOD - PERIOD / 2);
        assert_eq!(pacer.state(), PacerState::Overdue);
        assert_eq!(pacer.sleep_time(), 0);

        clock.advance(pacer.due_time_slot());
        assert_eq!(pacer.state(), PacerState::Overdue);

        clock.advance(1);
        assert_eq!(pacer.state(), PacerState::Aborted);
        assert_eq!(pacer.sleep_time(), 0);
    }

    #[test]
    fn test_no_drift_over_many_triggers() {
        let (mut pacer, clock) = pacer();
        let start = pacer.trigger();

        for i in 1..=10_000i64 {
            clock.advance(PERIOD);
            let t = pacer.trigger();
            assert_eq!(t, start + i * PERIOD, "drift at trigger {}", i);
        }
    }

    #[test]
    fn test_jitter_does_not_accumulate() {
        let (mut pacer, clock) = pacer();
        let start = pacer.trigger();

        // 调用方有时早、有时晚，但都在容差内
        let jitter = [0, 300_000, -200_000, 900_000, -900_000];
        for i in 1..=1_000i64 {
            let j = jitter[i as usize % jitter.len()];
            clock.set(start + i * PERIOD + j);
            let (state, t) = pacer.trigger_observed();
            assert_ne!(state, PacerState::Aborted);
            assert_eq!(t, start + i * PERIOD);
        }
    }

    #[test]
    fn test_catch_up_suppressed() {
        let (mut pacer, clock) = pacer();
        pacer.trigger();
        clock.advance(PERIOD / 4);
        assert_eq!(pacer.state(), PacerState::Waiting);

        clock.advance(10 * PERIOD);
        assert_eq!(pacer.state(), PacerState::Aborted);

        let (state, t) = pacer.trigger_observed();
        assert_eq!(state, PacerState::Aborted);
        assert_eq!(t, clock.now_ns());

        // 重新同步后回到正常节拍，而不是立刻可以再次触发
        assert_eq!(pacer.state(), PacerState::Waiting);
        assert_eq!(pacer.sleep_time(), PERIOD);
    }

    #[test]
    fn test_early_trigger_keeps_cadence() {
        let (mut pacer, clock) = pacer();
        let t0 = pacer.trigger();
        // WAITING 中触发同样精确累加
        clock.advance(1_000);
        assert_eq!(pacer.trigger(), t0 + PERIOD);
        assert_eq!(pacer.sleep_time(), 2 * PERIOD - 1_000);
    }

    #[test]
    fn test_reset() {
        let (mut pacer, clock) = pacer();
        pacer.trigger();
        pacer.reset();
        assert_eq!(pacer.state(), PacerState::Ready);
        assert_eq!(pacer.sleep_time(), 0);

        clock.advance(123);
        assert_eq!(pacer.trigger(), clock.now_ns());
    }

    #[test]
    fn test_explicit_due_time_slot() {
        let clock = ManualClock::new(0);
        let mut pacer = Pacer::new(clock.clone(), 1_000, Some(50));
        assert_eq!(pacer.due_time_slot(), 50);
        pacer.trigger();
        clock.advance(1_051);
        assert_eq!(pacer.state(), PacerState::Aborted);
    }
}
