//! 时钟
//!
//! 提供纳秒级时间源：
//! - SystemClock: 通过 clock_gettime 读取系统时钟（默认 CLOCK_MONOTONIC）
//! - ManualClock: 手动推进的时钟，用于测试和 dry run

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// 纳秒时间戳
pub type Nanos = i64;

pub const NANOS_PER_SEC: Nanos = 1_000_000_000;
pub const NANOS_PER_MILLI: Nanos = 1_000_000;

/// 纳秒时间源
///
/// 实现必须单调：两次调用之间返回值不会变小
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> Nanos;
}

/// 时钟错误
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    #[error("clock {clock:?} unavailable (errno {errno})")]
    Unavailable { clock: ClockSource, errno: i32 },
}

/// 系统时钟源选择
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ClockSource {
    /// CLOCK_MONOTONIC：不受墙钟调整影响
    #[default]
    Monotonic,
    /// CLOCK_REALTIME：接收端依赖 NTP 对齐时使用
    Realtime,
}

impl ClockSource {
    fn clock_id(self) -> libc::clockid_t {
        match self {
            Self::Monotonic => libc::CLOCK_MONOTONIC,
            Self::Realtime => libc::CLOCK_REALTIME,
        }
    }

    /// 按名称解析（配置项 `clock`）
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "monotonic" => Some(Self::Monotonic),
            "realtime" => Some(Self::Realtime),
            _ => None,
        }
    }
}

fn read_clock(id: libc::clockid_t) -> Result<Nanos, i32> {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::clock_gettime(id, &mut ts) };
    if result != 0 {
        return Err(std::io::Error::last_os_error().raw_os_error().unwrap_or(-1));
    }
    Ok(ts.tv_sec as Nanos * NANOS_PER_SEC + ts.tv_nsec as Nanos)
}

/// 系统时钟
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    source: ClockSource,
}

impl SystemClock {
    /// 创建系统时钟，并立即探测一次
    ///
    /// 时钟不可用时直接失败，而不是在播放中途退化
    pub fn new(source: ClockSource) -> Result<Self, ClockError> {
        read_clock(source.clock_id())
            .map_err(|errno| ClockError::Unavailable {
                clock: source,
                errno,
            })?;
        log::debug!("System clock ready: {:?}", source);
        Ok(Self { source })
    }

    pub fn monotonic() -> Result<Self, ClockError> {
        Self::new(ClockSource::Monotonic)
    }

    pub fn source(&self) -> ClockSource {
        self.source
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now_ns(&self) -> Nanos {
        // new() 已探测过该 clock id；此后读失败说明系统时钟不可用，无法继续出包
        read_clock(self.source.clock_id()).unwrap_or_else(|errno| {
            panic!(
                "clock {:?} failed after a successful probe (errno {})",
                self.source, errno
            )
        })
    }
}

/// 手动时钟
///
/// clone 之后共享同一个时间值，测试中一份交给 Pacer，一份用来推进
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Nanos) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    /// 时间前进 `ns` 纳秒
    pub fn advance(&self, ns: Nanos) {
        debug_assert!(ns >= 0, "manual clock must not go backwards");
        self.now.fetch_add(ns, Ordering::SeqCst);
    }

    pub fn set(&self, ns: Nanos) {
        self.now.store(ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_ns(&self) -> Nanos {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    #[inline]
    fn now_ns(&self) -> Nanos {
        (**self).now_ns()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock::monotonic().unwrap();
        let t1 = clock.now_ns();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let t2 = clock.now_ns();

        let diff = t2 - t1;
        // 至少 8ms
        assert!(diff >= 8_000_000, "expected at least 8ms, got {}ns", diff);
    }

    #[test]
    fn test_realtime_clock_available() {
        let clock = SystemClock::new(ClockSource::Realtime).unwrap();
        assert_eq!(clock.source(), ClockSource::Realtime);
        assert!(clock.now_ns() > 0);
    }

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(1_000);
        let handle = clock.clone();
        handle.advance(500);
        assert_eq!(clock.now_ns(), 1_500);

        handle.set(42);
        assert_eq!(clock.now_ns(), 42);
    }

    #[test]
    fn test_clock_source_names() {
        assert_eq!(ClockSource::from_name("Monotonic"), Some(ClockSource::Monotonic));
        assert_eq!(ClockSource::from_name("realtime"), Some(ClockSource::Realtime));
        assert_eq!(ClockSource::from_name("boottime"), None);
    }
}
