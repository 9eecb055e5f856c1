#![forbid(unsafe_code)]

//! Timestamps and time sources.
//!
//! Every deadline in cmloop is a [`Timestamp`]: a [`Duration`] measured from
//! the epoch of the clock that produced it. The epoch is the instant the clock
//! was created, so absolute deadlines stay small and fixed-width arithmetic
//! never overflows for the lifetime of a process.
//!
//! # Design
//!
//! [`TimeSource`] is either the real monotonic clock or a [`LabClock`]. A lab
//! clock only moves when told to, which makes dispatcher and time keeper
//! behaviour reproducible in tests without sleeping.
//!
//! # Example
//!
//! ```
//! use cmloop_core::time::{LabClock, TimeSource, Timestamp};
//! use web_time::Duration;
//!
//! let clock = LabClock::new();
//! let source = TimeSource::lab(&clock);
//! assert_eq!(source.now(), Timestamp::ZERO);
//!
//! clock.advance(Duration::from_millis(1500));
//! assert_eq!(source.now(), Timestamp::from_parts(1, 500_000_000));
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use web_time::{Duration, Instant};

const NANOS_PER_SEC: u64 = 1_000_000_000;

// ─── Timestamp ───────────────────────────────────────────────────────────────

/// A point in time, measured from the epoch of its clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// The clock epoch.
    pub const ZERO: Self = Self(Duration::ZERO);

    /// The latest representable timestamp.
    pub const MAX: Self = Self(Duration::MAX);

    /// Build a timestamp from seconds and nanoseconds.
    ///
    /// Nanoseconds of one second or more carry into the seconds field.
    /// Saturates at [`Timestamp::MAX`].
    #[must_use]
    pub fn from_parts(secs: u64, nanos: u64) -> Self {
        let carry = nanos / NANOS_PER_SEC;
        let subsec = (nanos % NANOS_PER_SEC) as u32;
        match secs.checked_add(carry) {
            Some(secs) => Self(Duration::new(secs, subsec)),
            None => Self::MAX,
        }
    }

    #[must_use]
    pub const fn from_duration(since_epoch: Duration) -> Self {
        Self(since_epoch)
    }

    /// Time elapsed since the clock epoch.
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        self.0
    }

    #[must_use]
    pub const fn secs(self) -> u64 {
        self.0.as_secs()
    }

    #[must_use]
    pub const fn subsec_nanos(self) -> u32 {
        self.0.subsec_nanos()
    }

    #[must_use]
    pub fn as_secs_f64(self) -> f64 {
        self.0.as_secs_f64()
    }

    #[must_use]
    pub fn checked_add(self, delta: Duration) -> Option<Self> {
        self.0.checked_add(delta).map(Self)
    }

    #[must_use]
    pub fn saturating_add(self, delta: Duration) -> Self {
        Self(self.0.saturating_add(delta))
    }

    /// Time from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.secs(), self.subsec_nanos())
    }
}

// ─── Clocks ──────────────────────────────────────────────────────────────────

/// Anything that can tell the current time relative to its own epoch.
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Real monotonic time, measured from the moment the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp(Instant::now().saturating_duration_since(self.epoch))
    }
}

/// A manually-advanceable clock for deterministic tests.
///
/// Clones share the same time. The clock starts at [`Timestamp::ZERO`] and
/// only moves forward.
#[derive(Debug, Clone, Default)]
pub struct LabClock {
    offset_ns: Arc<AtomicU64>,
}

impl LabClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the lab clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let ns = delta.as_nanos().min(u128::from(u64::MAX)) as u64;
        // An Err here means the update closure returned None, which it never does.
        let _ = self
            .offset_ns
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(ns))
            });
    }

    /// Move the clock to `target`. Earlier targets are ignored.
    pub fn advance_to(&self, target: Timestamp) {
        let ns = target.as_duration().as_nanos().min(u128::from(u64::MAX)) as u64;
        self.offset_ns.fetch_max(ns, Ordering::AcqRel);
    }

    /// Current lab time.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        Timestamp(Duration::from_nanos(self.offset_ns.load(Ordering::Acquire)))
    }
}

impl Clock for LabClock {
    fn now(&self) -> Timestamp {
        LabClock::now(self)
    }
}

// ─── Time source ─────────────────────────────────────────────────────────────

/// The clock a dispatcher schedules against.
#[derive(Debug, Clone)]
pub enum TimeSource {
    /// Real monotonic time.
    Real(MonotonicClock),
    /// Deterministic lab clock for testing.
    Lab(LabClock),
}

impl TimeSource {
    #[must_use]
    pub fn real() -> Self {
        Self::Real(MonotonicClock::new())
    }

    #[must_use]
    pub fn lab(clock: &LabClock) -> Self {
        Self::Lab(clock.clone())
    }

    #[inline]
    #[must_use]
    pub fn is_lab(&self) -> bool {
        matches!(self, Self::Lab(_))
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::real()
    }
}

impl Clock for TimeSource {
    fn now(&self) -> Timestamp {
        match self {
            Self::Real(clock) => clock.now(),
            Self::Lab(clock) => clock.now(),
        }
    }
}

impl TimeSource {
    /// Current time according to this source.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        Clock::now(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_carries_nanoseconds() {
        let ts = Timestamp::from_parts(1, 2_500_000_000);
        assert_eq!(ts.secs(), 3);
        assert_eq!(ts.subsec_nanos(), 500_000_000);
    }

    #[test]
    fn from_parts_saturates() {
        assert_eq!(
            Timestamp::from_parts(u64::MAX, NANOS_PER_SEC),
            Timestamp::MAX
        );
    }

    #[test]
    fn ordering_follows_duration() {
        let a = Timestamp::from_parts(0, 999_999_999);
        let b = Timestamp::from_parts(1, 0);
        assert!(a < b);
        assert_eq!(b.saturating_duration_since(a), Duration::from_nanos(1));
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
    }

    #[test]
    fn display_pads_nanoseconds() {
        assert_eq!(Timestamp::from_parts(2, 5).to_string(), "2.000000005s");
    }

    #[test]
    fn lab_clock_starts_at_zero_and_advances() {
        let clock = LabClock::new();
        assert_eq!(clock.now(), Timestamp::ZERO);
        clock.advance(Duration::from_millis(250));
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), Timestamp::from_parts(0, 500_000_000));
    }

    #[test]
    fn lab_clock_clones_share_time() {
        let clock = LabClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_secs(3));
        assert_eq!(other.now().secs(), 3);
    }

    #[test]
    fn lab_clock_advance_to_never_goes_backwards() {
        let clock = LabClock::new();
        clock.advance_to(Timestamp::from_parts(5, 0));
        clock.advance_to(Timestamp::from_parts(2, 0));
        assert_eq!(clock.now(), Timestamp::from_parts(5, 0));
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn time_source_reports_lab_mode() {
        let clock = LabClock::new();
        assert!(TimeSource::lab(&clock).is_lab());
        assert!(!TimeSource::real().is_lab());
    }
}
