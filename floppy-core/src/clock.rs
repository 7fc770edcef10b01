//! Monotonic time base and tick-domain conversions
//!
//! Two time domains coexist. Scheduling (index pulses, step settle, sync
//! deadlines) uses 32-bit wrapping microsecond stamps. Flux samples use
//! system-clock ticks, the unit the reload/capture timers count in.

// Re-export time types based on feature
#[cfg(feature = "embassy-time")]
pub use embassy_time::{Duration, Instant};

#[cfg(not(feature = "embassy-time"))]
pub use self::mock_time::{Duration, Instant};

#[cfg(not(feature = "embassy-time"))]
mod mock_time {
    /// Mock instant type for compilation without embassy-time
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub struct Instant(u64);

    impl Instant {
        pub fn now() -> Self {
            Self(0) // Placeholder implementation
        }

        pub fn from_micros(us: u64) -> Self {
            Self(us)
        }

        pub fn as_micros(&self) -> u64 {
            self.0
        }

        pub fn as_millis(&self) -> u64 {
            self.0 / 1000
        }

        pub fn duration_since(&self, other: Instant) -> Duration {
            Duration::from_micros(self.0.saturating_sub(other.0))
        }
    }

    /// Mock duration type
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub struct Duration(u64);

    impl Duration {
        pub fn from_micros(us: u64) -> Self {
            Self(us)
        }

        pub fn from_millis(ms: u64) -> Self {
            Self(ms * 1000)
        }

        pub fn as_micros(&self) -> u64 {
            self.0
        }

        pub fn as_millis(&self) -> u64 {
            self.0 / 1000
        }
    }

    impl core::ops::Add<Duration> for Instant {
        type Output = Instant;

        fn add(self, rhs: Duration) -> Instant {
            Instant(self.0 + rhs.0)
        }
    }
}

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// System clock frequency the flux timers count at.
pub const SYSCLK_MHZ: u32 = 72;

/// A wrapping 32-bit microsecond timestamp.
///
/// Wraps every ~71 minutes; all arithmetic is modular, so only deltas
/// shorter than half the wrap period are meaningful. Every interval in
/// the engine is bounded by a few revolutions.
pub type Stamp = u32;

/// Milliseconds as a stamp interval.
pub const fn stamp_ms(ms: u32) -> u32 {
    ms * 1000
}

/// Truncate a monotonic instant into the stamp domain.
pub fn stamp(now: Instant) -> Stamp {
    now.as_micros() as u32
}

pub const fn stamp_add(t: Stamp, interval: u32) -> Stamp {
    t.wrapping_add(interval)
}

/// Signed distance from `from` to `to`.
pub const fn stamp_delta(from: Stamp, to: Stamp) -> i32 {
    to.wrapping_sub(from) as i32
}

/// Elapsed microseconds since `t`.
pub const fn stamp_since(now: Stamp, t: Stamp) -> i32 {
    stamp_delta(t, now)
}

/// Nanoseconds to system-clock ticks, rounding down.
pub const fn sysclk_ns(ns: u32) -> u32 {
    (ns * SYSCLK_MHZ) / 1000
}

/// Microseconds to system-clock ticks.
pub const fn sysclk_us(us: u32) -> u32 {
    us * SYSCLK_MHZ
}

/// System-clock ticks to whole microseconds.
pub const fn ticks_to_us(ticks: u32) -> u32 {
    ticks / SYSCLK_MHZ
}

/// A one-shot software timer: an armed deadline in the stamp domain.
///
/// The owner arms or cancels it from any context; whoever drives time
/// forward (a timer task in firmware, the test harness on the host) polls
/// it and runs the associated service routine when it fires.
pub struct SoftTimer {
    deadline: AtomicU32,
    armed: AtomicBool,
}

impl SoftTimer {
    pub const fn new() -> Self {
        Self {
            deadline: AtomicU32::new(0),
            armed: AtomicBool::new(false),
        }
    }

    pub fn set(&self, deadline: Stamp) {
        self.deadline.store(deadline, Ordering::Relaxed);
        self.armed.store(true, Ordering::Release);
    }

    pub fn cancel(&self) {
        self.armed.store(false, Ordering::Release);
    }

    pub fn armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Deadline of the most recent arming, valid while armed.
    pub fn deadline(&self) -> Stamp {
        self.deadline.load(Ordering::Relaxed)
    }

    /// Consume a due deadline. Returns true exactly once per firing.
    pub fn poll(&self, now: Stamp) -> bool {
        if !self.armed() {
            return false;
        }
        if stamp_delta(self.deadline(), now) < 0 {
            return false;
        }
        self.armed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for SoftTimer {
    fn default() -> Self {
        Self::new()
    }
}
