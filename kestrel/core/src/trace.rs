//! Binary trace records.
//!
//! The scheduler reports its decisions as small binary records through an
//! optional [`TraceHook`]. The record identifiers are stable so host-side
//! tools can decode a captured stream.

/// Callback receiving a record identifier and its payload bytes.
///
/// Called from inside the scheduler critical section: it must not block and
/// should only copy the payload into a buffer.
pub type TraceHook = fn(record: u8, payload: &[u8]);

/// Canonical record identifiers.
pub mod records {
    /// Scheduler related record identifiers.
    pub mod sched {
        /// Next thread selected (`[next, previous]` slot indices).
        pub const NEXT: u8 = 50;
        /// Idle thread selected (`[previous]`).
        pub const IDLE: u8 = 53;
        /// Reschedule requested.
        pub const RESCHEDULE: u8 = 54;
        /// Round-robin quantum exhausted (`[thread]`).
        pub const QUANTUM: u8 = 55;
    }

    /// Thread lifecycle record identifiers.
    pub mod thread {
        /// Thread created (`[thread, priority]`).
        pub const CREATE: u8 = 60;
        /// Thread blocked (`[thread]`).
        pub const BLOCK: u8 = 61;
        /// Thread made ready after a wait (`[thread]`).
        pub const WAKE: u8 = 62;
        /// Wait deadline elapsed (`[thread]`).
        pub const TIMEOUT: u8 = 63;
        /// Thread terminated (`[thread]`).
        pub const EXIT: u8 = 64;
    }

    /// Mutex record identifiers.
    pub mod mutex {
        /// Effective priority raised (`[thread, from, to]`).
        pub const BOOST: u8 = 70;
        /// Effective priority lowered (`[thread, from, to]`).
        pub const UNWIND: u8 = 71;
        /// Ownership handed to a waiter (`[object, thread]`).
        pub const HANDOFF: u8 = 72;
    }
}
