//! Counting semaphores.
//!
//! A signal with waiters present hands the unit straight to the most urgent
//! waiter instead of incrementing the count, so a woken waiter never has to
//! compete for it again.

use kestrel_core::{KResult, KernelError, Timeout};

use crate::object::SemaphoreId;
use crate::scheduler::{Scheduler, Wait};
use crate::thread::{BlockedOn, ThreadId, WakeReason};
use crate::wait::WaitQueue;

#[derive(Debug)]
pub(crate) struct SemaphoreState {
    pub(crate) count: u32,
    pub(crate) max: u32,
    pub(crate) wait: WaitQueue,
}

impl SemaphoreState {
    pub(crate) fn new(count: u32, max: u32) -> Self {
        Self {
            count,
            max,
            wait: WaitQueue::new(),
        }
    }
}

impl<const THREADS: usize, const OBJECTS: usize, const LEVELS: usize>
    Scheduler<THREADS, OBJECTS, LEVELS>
{
    /// Creates a semaphore holding `initial` units, at most `max`.
    pub fn create_semaphore(&mut self, initial: u32, max: u32) -> KResult<SemaphoreId> {
        if max == 0 || initial > max {
            return Err(KernelError::InvalidArgument);
        }
        self.objects
            .insert_semaphore(SemaphoreState::new(initial, max))
    }

    /// Destroys a semaphore nobody waits on.
    pub fn destroy_semaphore(&mut self, semaphore: SemaphoreId) -> KResult<()> {
        if !self.objects.semaphore(semaphore)?.wait.is_empty() {
            return Err(KernelError::InvalidState);
        }
        self.objects.remove_semaphore(semaphore);
        Ok(())
    }

    pub fn semaphore_count(&self, semaphore: SemaphoreId) -> KResult<u32> {
        Ok(self.objects.semaphore(semaphore)?.count)
    }

    /// Threads waiting on `semaphore`, most urgent first.
    pub fn semaphore_waiters(
        &self,
        semaphore: SemaphoreId,
    ) -> KResult<impl Iterator<Item = ThreadId> + '_> {
        Ok(self.objects.semaphore(semaphore)?.wait.iter(&self.threads))
    }

    /// Takes one unit, blocking up to `timeout` while the count is zero.
    pub fn semaphore_wait(&mut self, semaphore: SemaphoreId, timeout: Timeout) -> KResult<Wait<()>> {
        let state = self.objects.semaphore_mut(semaphore)?;
        if state.count > 0 {
            state.count -= 1;
            return Ok(Wait::Done(()));
        }

        let deadline = timeout.deadline(self.now());
        self.block_current(BlockedOn::Semaphore(semaphore), deadline)?;
        let caller = self.current();
        self.objects
            .semaphore_mut(semaphore)?
            .wait
            .enqueue(&mut self.threads, caller);
        Ok(Wait::Blocked)
    }

    /// Takes one unit if available, `WouldBlock` otherwise.
    pub fn semaphore_try_wait(&mut self, semaphore: SemaphoreId) -> KResult<()> {
        let state = self.objects.semaphore_mut(semaphore)?;
        if state.count == 0 {
            return Err(KernelError::WouldBlock);
        }
        state.count -= 1;
        Ok(())
    }

    /// Releases one unit: wakes the most urgent waiter, or increments the
    /// count (`Overflow` at the maximum).
    pub fn semaphore_signal(&mut self, semaphore: SemaphoreId) -> KResult<()> {
        let state = self.objects.semaphore_mut(semaphore)?;
        match state.wait.pop_highest(&mut self.threads) {
            Some(waiter) => {
                self.wake(waiter, WakeReason::Granted);
                Ok(())
            }
            None if state.count == state.max => Err(KernelError::Overflow),
            None => {
                state.count += 1;
                Ok(())
            }
        }
    }
}
