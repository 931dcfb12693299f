//! Kernel error taxonomy

use thiserror::Error;

/// Result type used by every kernel entry point
pub type KResult<T> = Result<T, KernelError>;

/// Errors returned synchronously to the caller of a kernel operation.
///
/// Internal invariant violations are not represented here; they go through
/// [`crate::fatal::raise`] and never return.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// Operation on a thread or object in the wrong lifecycle state, or on a
    /// stale handle whose slot was released
    #[error("invalid state for this operation")]
    InvalidState,
    /// The blocking call's deadline elapsed
    #[error("operation timed out")]
    Timeout,
    /// Unlock (or condition wait) by a thread that does not own the mutex
    #[error("calling thread does not own the mutex")]
    NotOwner,
    /// A fixed-size table or queue is full
    #[error("fixed-size table is full")]
    ResourceExhausted,
    /// Argument out of range (priority, mask, handle kind)
    #[error("invalid argument")]
    InvalidArgument,
    /// A non-blocking variant found the resource unavailable
    #[error("operation would block")]
    WouldBlock,
    /// The wait can never complete (relock of a normal mutex, ownership
    /// cycle, self-join)
    #[error("operation would deadlock")]
    Deadlock,
    /// A counter reached its configured maximum
    #[error("counter overflow")]
    Overflow,
    /// The blocked thread was force-unblocked
    #[error("wait was interrupted")]
    Interrupted,
    /// Priority inheritance chain is longer than the configured maximum depth
    #[error("priority inheritance chain exceeds the configured depth")]
    ChainTooDeep,
}
