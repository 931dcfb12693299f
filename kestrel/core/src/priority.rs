//! Thread priority levels

use core::fmt;

/// Type-safe thread priority.
///
/// Larger values are more urgent. Level 0 is reserved for the idle thread;
/// the upper bound is the number of levels the scheduler was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(u8);

impl Priority {
    /// Priority of the idle thread (lowest possible)
    pub const IDLE: Priority = Priority(0);

    /// Lowest priority available to application threads
    pub const MIN: Priority = Priority(1);

    /// Create a priority from its raw level
    pub const fn new(level: u8) -> Self {
        Priority(level)
    }

    /// Get the raw priority level
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Index of the ready queue level for this priority
    pub const fn level(self) -> usize {
        self.0 as usize
    }

    /// Check whether this is the idle level
    pub const fn is_idle(self) -> bool {
        self.0 == 0
    }

    /// Check whether this priority is usable by an application thread in a
    /// scheduler built with `levels` priority levels
    pub const fn is_valid_for(self, levels: usize) -> bool {
        self.0 > 0 && (self.0 as usize) < levels
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Priority({})", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Priority {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Priority({})", self.0);
    }
}

/// Macro to create compile-time priority constants
#[macro_export]
macro_rules! priority {
    ($value:literal) => {
        $crate::Priority::new($value)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(Priority::new(10) > Priority::new(5));
        assert!(Priority::MIN > Priority::IDLE);
        assert!(Priority::IDLE.is_idle());
    }

    #[test]
    fn priority_validity_depends_on_levels() {
        assert!(!Priority::IDLE.is_valid_for(8));
        assert!(Priority::new(1).is_valid_for(8));
        assert!(Priority::new(7).is_valid_for(8));
        assert!(!Priority::new(8).is_valid_for(8));
    }

    #[test]
    fn priority_macro() {
        const HIGH: Priority = priority!(12);
        assert_eq!(HIGH.raw(), 12);
        assert_eq!(HIGH.level(), 12);
    }
}
