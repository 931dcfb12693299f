//! Interrupt-context bridge.
//!
//! Interrupt handlers never touch the ready queues. They count ticks, raise
//! the reschedule flag, or post a [`Deferred`] request into a bounded queue.
//! The kernel drains all three at the interrupt-return chokepoint: ticks
//! first, then requests in the order they were posted.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;
use kestrel_core::{KResult, KernelError};

use crate::object::{CondVarId, SemaphoreId};
use crate::scheduler::Scheduler;
use crate::thread::ThreadId;

/// Non-blocking operation requested from interrupt context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Deferred {
    SignalSemaphore(SemaphoreId),
    Resume(ThreadId),
    Interrupt(ThreadId),
    GenerateSignal { thread: ThreadId, signal: u8 },
    NotifyOne(CondVarId),
    NotifyAll(CondVarId),
}

#[derive(Debug)]
struct BridgeState<const N: usize> {
    queue: Deque<Deferred, N>,
    ticks: u32,
    reschedule: bool,
    dropped: u32,
}

/// Bounded mailbox between interrupt handlers and the scheduler.
pub struct Bridge<const N: usize> {
    state: Mutex<RefCell<BridgeState<N>>>,
}

impl<const N: usize> Default for Bridge<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Bridge<N> {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(BridgeState {
                queue: Deque::new(),
                ticks: 0,
                reschedule: false,
                dropped: 0,
            })),
        }
    }

    /// Queues `op`. A full queue rejects it with `ResourceExhausted`.
    pub fn post(&self, op: Deferred) -> KResult<()> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.queue.push_back(op).is_err() {
                state.dropped = state.dropped.wrapping_add(1);
                log::warn!("deferred queue full, dropping {:?}", op);
                return Err(KernelError::ResourceExhausted);
            }
            Ok(())
        })
    }

    /// Records one tick interrupt.
    pub fn count_tick(&self) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.ticks = state.ticks.saturating_add(1);
        });
    }

    pub fn request_reschedule(&self) {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).reschedule = true);
    }

    /// Number of queued requests
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).queue.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requests rejected because the queue was full
    pub fn dropped(&self) -> u32 {
        critical_section::with(|cs| self.state.borrow_ref(cs).dropped)
    }

    pub(crate) fn take_ticks(&self) -> u32 {
        critical_section::with(|cs| core::mem::take(&mut self.state.borrow_ref_mut(cs).ticks))
    }

    pub(crate) fn take_reschedule(&self) -> bool {
        critical_section::with(|cs| core::mem::take(&mut self.state.borrow_ref_mut(cs).reschedule))
    }

    pub(crate) fn pop(&self) -> Option<Deferred> {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).queue.pop_front())
    }

    /// Applies everything the handlers recorded, in order: ticks, queued
    /// requests, reschedule flag. Failed requests are logged and skipped.
    pub fn drain_into<const THREADS: usize, const OBJECTS: usize, const LEVELS: usize>(
        &self,
        scheduler: &mut Scheduler<THREADS, OBJECTS, LEVELS>,
    ) {
        for _ in 0..self.take_ticks() {
            scheduler.tick();
        }
        while let Some(op) = self.pop() {
            if let Err(err) = scheduler.apply_deferred(op) {
                log::warn!("deferred {:?} failed: {}", op, err);
            }
        }
        if self.take_reschedule() {
            scheduler.request_reschedule();
        }
    }
}

impl<const THREADS: usize, const OBJECTS: usize, const LEVELS: usize>
    Scheduler<THREADS, OBJECTS, LEVELS>
{
    /// Performs a request posted from interrupt context.
    pub fn apply_deferred(&mut self, op: Deferred) -> KResult<()> {
        match op {
            Deferred::SignalSemaphore(semaphore) => self.semaphore_signal(semaphore),
            Deferred::Resume(thread) => self.resume(thread),
            Deferred::Interrupt(thread) => self.interrupt(thread),
            Deferred::GenerateSignal { thread, signal } => self.generate_signal(thread, signal),
            Deferred::NotifyOne(condvar) => self.notify_one(condvar),
            Deferred::NotifyAll(condvar) => self.notify_all(condvar),
        }
    }
}
