//! # kestrel-sched - Preemptive Priority Scheduler
//!
//! Thread scheduling and synchronization for the Kestrel RTOS, using only
//! fixed, build-time sized tables.
//!
//! ## Architecture
//!
//! **Scheduler**: a ready queue per priority level with a bitmap for O(1)
//! selection, FIFO within a level, round-robin or FIFO policy per thread and
//! a sorted timeout list driven by the tick.
//!
//! **Synchronization**: mutexes (normal/recursive, priority inheritance or
//! protection), counting semaphores, condition variables with wait morphing
//! and per-thread signals, all built on one priority-ordered wait queue.
//!
//! **Interrupt bridge**: handlers only post deferred requests; the kernel
//! applies them at the interrupt-return chokepoint.
//!
//! **Two-phase blocking**: the context switch is performed by the port, so
//! a blocking call returns [`Wait::Blocked`] and the thread collects its
//! result with a `complete_*` call once it runs again. [`Kernel`] wraps both
//! phases.
//!
//! ## Module Overview
//!
//! - [`thread`] - thread control blocks, identifiers and configuration
//! - [`scheduler`] - selection, switching, ticks and thread lifecycle
//! - [`mutex`] - mutexes and the priority inheritance engine
//! - [`semaphore`], [`condvar`], [`signal`] - the other primitives
//! - [`bridge`] - deferred work from interrupt context
//! - [`port`] - the architecture interface
//! - [`kernel`] - the critical-section guarded facade

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

mod list;
mod ready;
mod wait;

pub mod bridge;
pub mod condvar;
pub mod kernel;
pub mod mutex;
pub mod object;
pub mod port;
pub mod scheduler;
pub mod semaphore;
pub mod signal;
pub mod thread;

pub use bridge::{Bridge, Deferred};
pub use kernel::{Isr, Kernel};
pub use mutex::{MutexInfo, MutexKind, MutexProtocol};
pub use object::{CondVarId, MutexId, ObjectId, SemaphoreId};
pub use port::Port;
pub use scheduler::{Scheduler, SchedulerStats, Wait};
pub use signal::SIGNAL_COUNT;
pub use thread::{
    BlockedOn, ContextPtr, SchedulingPolicy, StackRegion, Tcb, ThreadConfig, ThreadEntry,
    ThreadId, ThreadState, WakeReason,
};

pub use kestrel_core::{
    priority, KResult, KernelConfig, KernelError, Priority, Tick, Timeout,
};
