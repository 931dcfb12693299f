//! Architecture port interface.
//!
//! A port owns the parts of a context switch that are specific to the CPU:
//! building an initial stack frame and pending the low-priority switch
//! interrupt whose handler saves registers, calls
//! [`Kernel::switch_context`](crate::Kernel::switch_context) and restores
//! the returned context.

use crate::thread::{ContextPtr, StackRegion, ThreadEntry};

/// Hooks the kernel needs from the architecture layer.
pub trait Port: Send + Sync {
    /// Requests a context switch as soon as interrupts allow it.
    ///
    /// Called with the scheduler critical section released. Must be cheap
    /// and idempotent: calling it twice before the switch runs performs one
    /// switch.
    fn pend_context_switch(&self);

    /// Prepares `stack` so that the first switch to the thread enters
    /// `entry`, and returns the initial context pointer.
    fn init_stack(&self, stack: StackRegion, entry: ThreadEntry) -> ContextPtr;

    /// Sleeps until the next interrupt. Called from the idle loop.
    fn wait_for_interrupt(&self) {
        core::hint::spin_loop();
    }
}
