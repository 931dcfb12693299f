//! Per-thread signals.
//!
//! Each thread has 32 signal numbers. A generated signal is delivered
//! straight to the thread if it is waiting for it, otherwise it stays
//! pending until the thread asks for it.

use kestrel_core::{KResult, KernelError, Timeout};

use crate::scheduler::{Scheduler, Wait};
use crate::thread::{BlockedOn, ThreadId, ThreadState, WakeReason};

/// Number of signal numbers per thread
pub const SIGNAL_COUNT: u8 = 32;

/// Lowest signal number set in `set`.
fn lowest(set: u32) -> Option<u8> {
    (set != 0).then(|| set.trailing_zeros() as u8)
}

impl<const THREADS: usize, const OBJECTS: usize, const LEVELS: usize>
    Scheduler<THREADS, OBJECTS, LEVELS>
{
    /// Raises signal `signal` for `thread`.
    pub fn generate_signal(&mut self, thread: ThreadId, signal: u8) -> KResult<()> {
        if signal >= SIGNAL_COUNT {
            return Err(KernelError::InvalidArgument);
        }
        let bit = 1u32 << signal;
        let tcb = self.threads.lookup_mut(thread)?;
        if tcb.state == ThreadState::Terminated {
            return Err(KernelError::InvalidState);
        }

        let blocked_on = tcb.blocked_on;
        match blocked_on {
            Some(BlockedOn::Signals(mask)) if mask & bit != 0 => {
                log::trace!("signal {} delivered to {}", signal, thread);
                self.wake(thread, WakeReason::Signal(signal));
            }
            _ => tcb.pending_signals |= bit,
        }
        Ok(())
    }

    /// Accepts the lowest pending signal in `mask`, blocking up to `timeout`
    /// while none is pending.
    pub fn wait_signal(&mut self, mask: u32, timeout: Timeout) -> KResult<Wait<u8>> {
        if mask == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if let Some(signal) = self.take_pending(mask) {
            return Ok(Wait::Done(signal));
        }

        let deadline = timeout.deadline(self.now());
        self.block_current(BlockedOn::Signals(mask), deadline)?;
        Ok(Wait::Blocked)
    }

    /// Accepts the lowest pending signal in `mask`, `WouldBlock` if none.
    pub fn try_wait_signal(&mut self, mask: u32) -> KResult<u8> {
        if mask == 0 {
            return Err(KernelError::InvalidArgument);
        }
        self.take_pending(mask).ok_or(KernelError::WouldBlock)
    }

    /// Pending signal set of `thread`.
    pub fn pending_signals(&self, thread: ThreadId) -> KResult<u32> {
        Ok(self.threads.lookup(thread)?.pending_signals)
    }

    fn take_pending(&mut self, mask: u32) -> Option<u8> {
        let current = self.current();
        let tcb = self.threads.tcb_mut(current);
        let signal = lowest(tcb.pending_signals & mask)?;
        tcb.pending_signals &= !(1u32 << signal);
        Some(signal)
    }
}
