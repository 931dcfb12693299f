//! Tick clock, deadlines and timeouts

use core::fmt;

/// Half of the tick range; deadlines further away than this are treated as
/// already in the past when comparing across a wraparound.
const HALF_RANGE: u64 = 1 << 63;

/// System tick count
///
/// Arithmetic on ticks wraps; comparisons go through [`Tick::is_after`] and
/// [`Tick::has_reached`], which stay correct across the wraparound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tick(u64);

impl Tick {
    /// Zero tick
    pub const ZERO: Self = Self(0);

    /// Maximum tick value
    pub const MAX: Self = Self(u64::MAX);

    /// Create a new tick count
    pub const fn new(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Get the raw tick value
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Tick `ticks` after this one
    pub const fn offset(self, ticks: u32) -> Self {
        Self(self.0.wrapping_add(ticks as u64))
    }

    /// Calculate elapsed ticks since a previous tick
    pub const fn elapsed_since(self, previous: Tick) -> u64 {
        self.0.wrapping_sub(previous.0)
    }

    /// Check if this tick is strictly after another tick (handles wraparound)
    pub const fn is_after(self, other: Tick) -> bool {
        let delta = self.0.wrapping_sub(other.0);
        delta != 0 && delta < HALF_RANGE
    }

    /// Check if this tick is at or past `deadline` (handles wraparound)
    pub const fn has_reached(self, deadline: Tick) -> bool {
        self.0.wrapping_sub(deadline.0) < HALF_RANGE
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick:{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Tick {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "tick:{}", self.0);
    }
}

/// Monotonic tick counter advanced by the tick interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickClock {
    now: Tick,
}

impl TickClock {
    /// Create a clock starting at `start`
    pub const fn new(start: Tick) -> Self {
        Self { now: start }
    }

    /// Current tick
    pub const fn now(&self) -> Tick {
        self.now
    }

    /// Advance the clock by one tick and return the new value
    pub fn advance(&mut self) -> Tick {
        self.now = self.now.offset(1);
        self.now
    }
}

/// How long a blocking call may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Wait until the operation succeeds or the thread is interrupted
    Forever,
    /// Wait at most this many ticks
    After(u32),
    /// Wait until the clock reaches this tick
    At(Tick),
}

impl Timeout {
    /// Absolute deadline for a wait starting at `now`, or `None` for
    /// [`Timeout::Forever`]
    pub const fn deadline(self, now: Tick) -> Option<Tick> {
        match self {
            Self::Forever => None,
            Self::After(ticks) => Some(now.offset(ticks)),
            Self::At(tick) => Some(tick),
        }
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::Forever
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_advances_and_wraps() {
        let mut clock = TickClock::new(Tick::new(u64::MAX - 1));
        assert_eq!(clock.advance(), Tick::MAX);
        assert_eq!(clock.advance(), Tick::ZERO);
        assert_eq!(clock.now(), Tick::ZERO);
    }

    #[test]
    fn deadline_comparison_across_wrap() {
        let before = Tick::new(u64::MAX - 2);
        let deadline = before.offset(5);
        assert_eq!(deadline, Tick::new(2));

        assert!(!before.has_reached(deadline));
        assert!(!Tick::MAX.has_reached(deadline));
        assert!(Tick::new(2).has_reached(deadline));
        assert!(Tick::new(3).has_reached(deadline));
        assert!(deadline.is_after(before));
        assert!(!before.is_after(deadline));
    }

    #[test]
    fn timeout_deadlines() {
        let now = Tick::new(100);
        assert_eq!(Timeout::Forever.deadline(now), None);
        assert_eq!(Timeout::After(5).deadline(now), Some(Tick::new(105)));
        assert_eq!(Timeout::At(Tick::new(7)).deadline(now), Some(Tick::new(7)));
    }

    #[test]
    fn elapsed_handles_wrap() {
        let early = Tick::new(u64::MAX);
        let late = early.offset(3);
        assert_eq!(late.elapsed_since(early), 3);
    }
}
