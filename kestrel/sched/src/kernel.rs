//! Kernel facade.
//!
//! [`Kernel`] is the single aggregate a board places in a `static`. It wraps
//! the scheduler in the global critical section, owns the interrupt bridge
//! and talks to the CPU through a [`Port`]. Thread-context calls that block
//! pend the context switch and collect their result once the thread runs
//! again; interrupt handlers go through [`Kernel::isr`] and only enqueue
//! work.
//!
//! ```ignore
//! static KERNEL: Kernel<BoardPort, 8, 16, 16, 8> = Kernel::new(BoardPort);
//!
//! KERNEL.init(KernelConfig::default())?;
//! KERNEL.spawn(ThreadConfig::new("blinky", priority!(2), entry).with_stack(stack))?;
//! KERNEL.run_idle()
//! ```

use core::cell::RefCell;

use critical_section::Mutex;
use kestrel_core::{KResult, KernelConfig, KernelError, Tick, Timeout};

use crate::bridge::{Bridge, Deferred};
use crate::mutex::{MutexKind, MutexProtocol};
use crate::object::{CondVarId, MutexId, SemaphoreId};
use crate::port::Port;
use crate::scheduler::{Scheduler, Wait};
use crate::thread::{ContextPtr, ThreadConfig, ThreadId};

/// RTOS kernel instance.
///
/// `THREADS`, `OBJECTS` and `LEVELS` size the scheduler tables; `DEFERRED`
/// bounds the queue of requests posted from interrupt handlers.
pub struct Kernel<
    P: Port,
    const THREADS: usize,
    const OBJECTS: usize,
    const LEVELS: usize,
    const DEFERRED: usize,
> {
    port: P,
    scheduler: Mutex<RefCell<Option<Scheduler<THREADS, OBJECTS, LEVELS>>>>,
    bridge: Bridge<DEFERRED>,
}

impl<P: Port, const THREADS: usize, const OBJECTS: usize, const LEVELS: usize, const DEFERRED: usize>
    Kernel<P, THREADS, OBJECTS, LEVELS, DEFERRED>
{
    pub const fn new(port: P) -> Self {
        Self {
            port,
            scheduler: Mutex::new(RefCell::new(None)),
            bridge: Bridge::new(),
        }
    }

    /// Creates the scheduler. The calling context becomes the idle thread.
    pub fn init(&self, config: KernelConfig) -> KResult<()> {
        critical_section::with(|cs| {
            let mut slot = self.scheduler.borrow_ref_mut(cs);
            if slot.is_some() {
                return Err(KernelError::InvalidState);
            }
            *slot = Some(Scheduler::new(config)?);
            log::info!(
                "kestrel kernel initialised: {} threads, {} objects, {} levels",
                THREADS,
                OBJECTS,
                LEVELS
            );
            Ok(())
        })
    }

    pub fn is_initialized(&self) -> bool {
        critical_section::with(|cs| self.scheduler.borrow_ref(cs).is_some())
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn bridge(&self) -> &Bridge<DEFERRED> {
        &self.bridge
    }

    /// Runs `f` on the scheduler inside the critical section.
    /// `InvalidState` before [`init`](Self::init).
    pub fn with_scheduler<R>(
        &self,
        f: impl FnOnce(&mut Scheduler<THREADS, OBJECTS, LEVELS>) -> KResult<R>,
    ) -> KResult<R> {
        critical_section::with(|cs| {
            let mut slot = self.scheduler.borrow_ref_mut(cs);
            let scheduler = slot.as_mut().ok_or(KernelError::InvalidState)?;
            f(scheduler)
        })
    }

    /// Runs a non-blocking operation, then pends a switch if it made one
    /// necessary.
    fn call<R>(
        &self,
        f: impl FnOnce(&mut Scheduler<THREADS, OBJECTS, LEVELS>) -> KResult<R>,
    ) -> KResult<R> {
        let (result, pending) = self.with_scheduler(|s| {
            let result = f(s);
            Ok((result, s.is_switch_pending()))
        })?;
        if pending {
            self.port.pend_context_switch();
        }
        result
    }

    /// Runs a possibly blocking operation. When the caller was suspended the
    /// switch is pended; execution continues here once the thread is
    /// scheduled again, and `complete` collects the wait result.
    fn block_on<T>(
        &self,
        start: impl FnOnce(&mut Scheduler<THREADS, OBJECTS, LEVELS>) -> KResult<Wait<T>>,
        complete: impl FnOnce(&mut Scheduler<THREADS, OBJECTS, LEVELS>) -> KResult<T>,
    ) -> KResult<T> {
        match self.call(start)? {
            Wait::Done(value) => Ok(value),
            Wait::Blocked => self.with_scheduler(complete),
        }
    }

    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    /// Creates a thread and lets the port build its initial stack frame.
    pub fn create_thread(&self, config: ThreadConfig) -> KResult<ThreadId> {
        let context = self.port.init_stack(config.stack, config.entry);
        self.with_scheduler(|s| {
            let id = s.create_thread(config)?;
            s.set_context(id, context)?;
            Ok(id)
        })
    }

    pub fn start_thread(&self, id: ThreadId) -> KResult<()> {
        self.call(|s| s.start_thread(id))
    }

    /// Creates and starts a thread.
    pub fn spawn(&self, config: ThreadConfig) -> KResult<ThreadId> {
        let id = self.create_thread(config)?;
        self.start_thread(id)?;
        Ok(id)
    }

    /// Terminates the calling thread.
    pub fn exit(&self, code: usize) -> KResult<()> {
        self.call(|s| s.exit_current(code))
    }

    /// Waits for `thread` to terminate and returns its exit code.
    pub fn join(&self, thread: ThreadId, timeout: Timeout) -> KResult<usize> {
        self.block_on(|s| s.join(thread, timeout), |s| s.complete_join())
    }

    pub fn detach(&self, thread: ThreadId) -> KResult<()> {
        self.call(|s| s.detach(thread))
    }

    pub fn sleep(&self, timeout: Timeout) -> KResult<()> {
        self.block_on(|s| s.sleep(timeout), |s| s.complete_wait())
    }

    pub fn yield_now(&self) -> KResult<()> {
        self.call(|s| {
            s.yield_now();
            Ok(())
        })
    }

    /// Parks the calling thread until [`resume`](Self::resume) or `timeout`.
    pub fn park(&self, timeout: Timeout) -> KResult<()> {
        self.block_on(|s| s.suspend_current(timeout), |s| s.complete_wait())
    }

    pub fn resume(&self, thread: ThreadId) -> KResult<()> {
        self.call(|s| s.resume(thread))
    }

    /// Force-unblocks `thread`; its pending wait fails with `Interrupted`.
    pub fn interrupt(&self, thread: ThreadId) -> KResult<()> {
        self.call(|s| s.interrupt(thread))
    }

    pub fn current(&self) -> KResult<ThreadId> {
        self.with_scheduler(|s| Ok(s.current()))
    }

    // ------------------------------------------------------------------
    // Mutexes
    // ------------------------------------------------------------------

    pub fn create_mutex(&self, kind: MutexKind, protocol: MutexProtocol) -> KResult<MutexId> {
        self.with_scheduler(|s| s.create_mutex(kind, protocol))
    }

    pub fn lock(&self, mutex: MutexId, timeout: Timeout) -> KResult<()> {
        self.block_on(|s| s.mutex_lock(mutex, timeout), |s| s.complete_wait())
    }

    pub fn try_lock(&self, mutex: MutexId) -> KResult<()> {
        self.call(|s| s.mutex_try_lock(mutex))
    }

    pub fn unlock(&self, mutex: MutexId) -> KResult<()> {
        self.call(|s| s.mutex_unlock(mutex))
    }

    pub fn destroy_mutex(&self, mutex: MutexId) -> KResult<()> {
        self.with_scheduler(|s| s.destroy_mutex(mutex))
    }

    // ------------------------------------------------------------------
    // Semaphores
    // ------------------------------------------------------------------

    pub fn create_semaphore(&self, initial: u32, max: u32) -> KResult<SemaphoreId> {
        self.with_scheduler(|s| s.create_semaphore(initial, max))
    }

    pub fn wait(&self, semaphore: SemaphoreId, timeout: Timeout) -> KResult<()> {
        self.block_on(|s| s.semaphore_wait(semaphore, timeout), |s| s.complete_wait())
    }

    pub fn try_wait(&self, semaphore: SemaphoreId) -> KResult<()> {
        self.call(|s| s.semaphore_try_wait(semaphore))
    }

    pub fn signal(&self, semaphore: SemaphoreId) -> KResult<()> {
        self.call(|s| s.semaphore_signal(semaphore))
    }

    pub fn destroy_semaphore(&self, semaphore: SemaphoreId) -> KResult<()> {
        self.with_scheduler(|s| s.destroy_semaphore(semaphore))
    }

    // ------------------------------------------------------------------
    // Condition variables
    // ------------------------------------------------------------------

    pub fn create_condvar(&self) -> KResult<CondVarId> {
        self.with_scheduler(|s| s.create_condvar())
    }

    /// Atomically releases `mutex` and waits on `condvar`. Returns holding
    /// `mutex`, whatever the result.
    pub fn condvar_wait(&self, condvar: CondVarId, mutex: MutexId, timeout: Timeout) -> KResult<()> {
        self.block_on(
            |s| s.condvar_wait(condvar, mutex, timeout),
            |s| s.complete_wait(),
        )
    }

    pub fn notify_one(&self, condvar: CondVarId) -> KResult<()> {
        self.call(|s| s.notify_one(condvar))
    }

    pub fn notify_all(&self, condvar: CondVarId) -> KResult<()> {
        self.call(|s| s.notify_all(condvar))
    }

    pub fn destroy_condvar(&self, condvar: CondVarId) -> KResult<()> {
        self.with_scheduler(|s| s.destroy_condvar(condvar))
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    pub fn generate_signal(&self, thread: ThreadId, signal: u8) -> KResult<()> {
        self.call(|s| s.generate_signal(thread, signal))
    }

    pub fn wait_signal(&self, mask: u32, timeout: Timeout) -> KResult<u8> {
        self.block_on(|s| s.wait_signal(mask, timeout), |s| s.complete_signal_wait())
    }

    pub fn try_wait_signal(&self, mask: u32) -> KResult<u8> {
        self.with_scheduler(|s| s.try_wait_signal(mask))
    }

    // ------------------------------------------------------------------
    // Interrupt side
    // ------------------------------------------------------------------

    /// Tick interrupt entry point. The tick is applied at the next
    /// [`on_interrupt_return`](Self::on_interrupt_return).
    pub fn tick_isr(&self) {
        self.bridge.count_tick();
    }

    /// Handle for interrupt handlers.
    pub fn isr(&self) -> Isr<'_, P, THREADS, OBJECTS, LEVELS, DEFERRED> {
        Isr { kernel: self }
    }

    /// Interrupt-return chokepoint: applies pending ticks and deferred
    /// requests, then pends a context switch if one is needed.
    pub fn on_interrupt_return(&self) {
        let pending = self.with_scheduler(|s| {
            self.bridge.drain_into(s);
            Ok(s.is_switch_pending())
        });
        if pending == Ok(true) {
            self.port.pend_context_switch();
        }
    }

    /// Context-switch callback for the port: stores the outgoing context and
    /// returns the one to restore. Before [`init`](Self::init) the saved
    /// context is handed back unchanged.
    pub fn switch_context(&self, saved: ContextPtr) -> ContextPtr {
        self.with_scheduler(|s| Ok(s.switch_context(saved)))
            .unwrap_or(saved)
    }

    pub fn now(&self) -> KResult<Tick> {
        self.with_scheduler(|s| Ok(s.now()))
    }

    /// Body of the idle thread.
    pub fn run_idle(&self) -> ! {
        loop {
            self.port.wait_for_interrupt();
        }
    }
}

/// Interrupt-context view of a [`Kernel`].
///
/// Every request is queued and performed at the interrupt-return
/// chokepoint; a full queue yields `ResourceExhausted`.
pub struct Isr<
    'k,
    P: Port,
    const THREADS: usize,
    const OBJECTS: usize,
    const LEVELS: usize,
    const DEFERRED: usize,
> {
    kernel: &'k Kernel<P, THREADS, OBJECTS, LEVELS, DEFERRED>,
}

impl<P: Port, const THREADS: usize, const OBJECTS: usize, const LEVELS: usize, const DEFERRED: usize>
    Isr<'_, P, THREADS, OBJECTS, LEVELS, DEFERRED>
{
    pub fn signal_semaphore(&self, semaphore: SemaphoreId) -> KResult<()> {
        self.kernel.bridge.post(Deferred::SignalSemaphore(semaphore))
    }

    pub fn resume(&self, thread: ThreadId) -> KResult<()> {
        self.kernel.bridge.post(Deferred::Resume(thread))
    }

    pub fn interrupt(&self, thread: ThreadId) -> KResult<()> {
        self.kernel.bridge.post(Deferred::Interrupt(thread))
    }

    pub fn generate_signal(&self, thread: ThreadId, signal: u8) -> KResult<()> {
        self.kernel
            .bridge
            .post(Deferred::GenerateSignal { thread, signal })
    }

    pub fn notify_one(&self, condvar: CondVarId) -> KResult<()> {
        self.kernel.bridge.post(Deferred::NotifyOne(condvar))
    }

    pub fn notify_all(&self, condvar: CondVarId) -> KResult<()> {
        self.kernel.bridge.post(Deferred::NotifyAll(condvar))
    }

    pub fn request_reschedule(&self) {
        self.kernel.bridge.request_reschedule();
    }

    pub fn tick(&self) {
        self.kernel.bridge.count_tick();
    }

    pub fn now(&self) -> KResult<Tick> {
        self.kernel.now()
    }
}
