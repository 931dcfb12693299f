//! Priority scheduler core.
//!
//! The scheduler owns every thread control block, every synchronization
//! object, the ready queue set and the sorted timeout list. It never
//! switches stacks itself: operations that change what should run only set
//! the pending-switch flag, and the architecture layer later calls
//! [`Scheduler::switch_context`] at a safe point to finalize the transfer.
//!
//! ## Scheduling policy
//!
//! 1. The highest non-empty priority level runs; ties are strict FIFO.
//! 2. A thread that becomes ready at a strictly higher priority than the
//!    running one preempts it; the preempted thread keeps the head of its
//!    level.
//! 3. Round-robin threads rotate behind same-priority peers when their
//!    quantum is exhausted; FIFO threads run until they block or yield.
//! 4. The idle thread (priority 0) is created with the scheduler and is
//!    always runnable, so selection never comes up empty.

use kestrel_core::fatal::{self, FatalError};
use kestrel_core::trace::records::{sched, thread as thread_records};
use kestrel_core::{KResult, KernelConfig, KernelError, Priority, Tick, TickClock, Timeout};

use crate::list::{LinkKind, List};
use crate::object::ObjectTable;
use crate::ready::ReadyQueueSet;
use crate::thread::{
    BlockedOn, ContextPtr, SchedulingPolicy, StackRegion, Tcb, ThreadConfig, ThreadEntry,
    ThreadId, ThreadState, ThreadTable, WakeReason,
};

/// Outcome of an operation that may suspend the calling thread.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wait<T> {
    /// Completed without blocking
    Done(T),
    /// The caller is now blocked; once it runs again it collects the result
    /// with the matching `complete_*` call
    Blocked,
}

impl<T> Wait<T> {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked)
    }
}

/// Scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SchedulerStats {
    /// Calls to [`Scheduler::request_reschedule`], including implicit ones
    pub reschedule_requests: u32,
    /// Switches that changed the running thread
    pub context_switches: u32,
    /// Waits that ended because their deadline elapsed
    pub timeouts: u32,
}

/// Thread scheduler and synchronization state.
///
/// `THREADS` bounds the thread table (including the idle thread), `OBJECTS`
/// the number of live mutexes, semaphores and condition variables, and
/// `LEVELS` the number of priority levels (at most 64).
#[derive(Debug)]
pub struct Scheduler<const THREADS: usize, const OBJECTS: usize, const LEVELS: usize> {
    pub(crate) threads: ThreadTable<THREADS>,
    pub(crate) objects: ObjectTable<OBJECTS>,
    pub(crate) ready: ReadyQueueSet<LEVELS>,
    /// Blocked threads with a deadline, earliest first
    timers: List,
    current: ThreadId,
    idle: ThreadId,
    clock: TickClock,
    switch_pending: bool,
    pub(crate) config: KernelConfig,
    pub(crate) stats: SchedulerStats,
}

impl<const THREADS: usize, const OBJECTS: usize, const LEVELS: usize>
    Scheduler<THREADS, OBJECTS, LEVELS>
{
    /// Creates the scheduler and its idle thread.
    ///
    /// The calling context becomes the idle thread: it is marked running and
    /// its context is saved by the first [`switch_context`](Self::switch_context).
    pub fn new(config: KernelConfig) -> KResult<Self> {
        if !(2..=64).contains(&LEVELS) || config.round_robin_quantum == 0 {
            return Err(KernelError::InvalidArgument);
        }

        let mut threads = ThreadTable::new();
        let idle_config = ThreadConfig::new("idle", Priority::IDLE, ThreadEntry::idle())
            .with_policy(SchedulingPolicy::Fifo)
            .with_stack(StackRegion::new(config.idle_stack.0, config.idle_stack.1));
        let idle = threads.allocate(&idle_config, config.round_robin_quantum)?;
        threads.tcb_mut(idle).state = ThreadState::Running;

        log::debug!("scheduler started: {} levels, idle {}", LEVELS, idle);

        Ok(Self {
            threads,
            objects: ObjectTable::new(),
            ready: ReadyQueueSet::new(),
            timers: List::new(LinkKind::Timer),
            current: idle,
            idle,
            clock: TickClock::new(config.initial_tick),
            switch_pending: false,
            config,
            stats: SchedulerStats::default(),
        })
    }

    /// Current tick
    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    /// Thread that owns the CPU (or is about to give it up)
    pub fn current(&self) -> ThreadId {
        self.current
    }

    pub fn idle_thread(&self) -> ThreadId {
        self.idle
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// True when a context switch has been requested but not yet performed.
    pub fn is_switch_pending(&self) -> bool {
        self.switch_pending
    }

    /// Thread control block for `id`, or `InvalidState` for a stale handle.
    pub fn thread(&self, id: ThreadId) -> KResult<&Tcb> {
        self.threads.lookup(id)
    }

    /// Number of live threads, including the idle thread.
    pub fn thread_count(&self) -> usize {
        self.threads.live()
    }

    /// Threads ready at `priority`, in the order they will run.
    pub fn ready_at(&self, priority: Priority) -> impl Iterator<Item = ThreadId> + '_ {
        self.ready.iter_level(&self.threads, priority)
    }

    // ------------------------------------------------------------------
    // Selection and switching
    // ------------------------------------------------------------------

    /// Thread that should own the CPU now.
    pub fn select_next(&self) -> ThreadId {
        let current = self.threads.tcb(self.current);
        if current.state == ThreadState::Running {
            match self.ready.highest_priority() {
                None => return self.current,
                Some(top) if top < current.effective_priority => return self.current,
                Some(top) if top == current.effective_priority && !current.rotate => {
                    return self.current
                }
                Some(_) => {}
            }
        }

        match self.ready.peek_highest() {
            Some(id) => id,
            None => fatal::raise(FatalError::NoRunnableThread),
        }
    }

    /// Sets the pending-switch flag. The switch itself happens at the next
    /// safe point.
    pub fn request_reschedule(&mut self) {
        self.stats.reschedule_requests = self.stats.reschedule_requests.wrapping_add(1);
        if !self.switch_pending {
            self.switch_pending = true;
            self.emit_trace(sched::RESCHEDULE, &[self.current.index() as u8]);
        }
    }

    /// Requests a reschedule if a ready thread should displace the running
    /// one.
    pub(crate) fn check_preemption(&mut self) {
        if self.switch_pending {
            return;
        }
        let current = self.threads.tcb(self.current);
        let preempted = current.state != ThreadState::Running
            || self.ready.highest_priority().is_some_and(|top| {
                top > current.effective_priority
                    || (top == current.effective_priority && current.rotate)
            });
        if preempted {
            self.request_reschedule();
        }
    }

    /// Finalizes a context switch.
    ///
    /// Stores `saved` as the outgoing thread's context, requeues or reaps the
    /// outgoing thread, makes the selected thread current and returns its
    /// context.
    pub fn switch_context(&mut self, saved: ContextPtr) -> ContextPtr {
        let prev = self.current;
        let next = self.select_next();
        let quantum = self.config.round_robin_quantum;

        self.threads.tcb_mut(prev).context = saved;

        if next != prev {
            let tcb = self.threads.tcb_mut(prev);
            match tcb.state {
                ThreadState::Running => {
                    tcb.state = ThreadState::Ready;
                    let priority = tcb.effective_priority;
                    if core::mem::take(&mut tcb.rotate) {
                        tcb.quantum = quantum;
                        self.ready.push_back(&mut self.threads, prev, priority);
                    } else {
                        self.ready.push_front(&mut self.threads, prev, priority);
                    }
                }
                ThreadState::Terminated if tcb.detached || tcb.collected => {
                    self.threads.release(prev);
                    log::trace!("reaped {}", prev);
                }
                _ => {}
            }
        }

        let tcb = self.threads.tcb_mut(next);
        if tcb.state == ThreadState::Ready {
            let priority = tcb.effective_priority;
            tcb.state = ThreadState::Running;
            if tcb.quantum == 0 {
                tcb.quantum = quantum;
            }
            self.ready.remove(&mut self.threads, next, priority);
        } else if tcb.quantum > 0 {
            // A yield with nobody to rotate with is dropped. An exhausted
            // quantum stays at zero with `rotate` set until a peer is ready.
            tcb.rotate = false;
        }

        self.switch_pending = false;
        if next != prev {
            self.current = next;
            self.stats.context_switches = self.stats.context_switches.wrapping_add(1);
            if next == self.idle {
                self.emit_trace(sched::IDLE, &[prev.index() as u8]);
            } else {
                self.emit_trace(sched::NEXT, &[next.index() as u8, prev.index() as u8]);
            }
            log::trace!("switch {} -> {}", prev, next);
        }

        self.threads.tcb(next).context
    }

    // ------------------------------------------------------------------
    // Time
    // ------------------------------------------------------------------

    /// Advances the tick clock by one and processes what became due.
    ///
    /// Expired waits are woken with a timeout result; the running
    /// round-robin thread spends one tick of its quantum.
    pub fn tick(&mut self) {
        let now = self.clock.advance();
        self.expire_timeouts(now);

        let quantum_exhausted = {
            let tcb = self.threads.tcb_mut(self.current);
            if tcb.state == ThreadState::Running
                && tcb.policy == SchedulingPolicy::RoundRobin
                && tcb.quantum > 0
            {
                tcb.quantum -= 1;
                if tcb.quantum == 0 {
                    tcb.rotate = true;
                }
                tcb.quantum == 0
            } else {
                false
            }
        };

        if quantum_exhausted {
            self.emit_trace(sched::QUANTUM, &[self.current.index() as u8]);
            self.request_reschedule();
        }
    }

    fn expire_timeouts(&mut self, now: Tick) {
        while let Some(head) = self.timers.head() {
            let due = match self.threads.tcb(head).deadline {
                Some(deadline) => now.has_reached(deadline),
                None => true,
            };
            if !due {
                break;
            }
            self.timers.remove(&mut self.threads, head);
            self.on_timeout(head);
        }
    }

    fn arm_timer(&mut self, id: ThreadId, deadline: Tick) {
        let before = self
            .timers
            .iter(&self.threads)
            .find(|&other| match self.threads.tcb(other).deadline {
                Some(other_deadline) => other_deadline.is_after(deadline),
                None => false,
            });
        self.timers.insert_before(&mut self.threads, id, before);
    }

    pub(crate) fn cancel_timer(&mut self, id: ThreadId) {
        self.timers.remove(&mut self.threads, id);
        self.threads.tcb_mut(id).deadline = None;
    }

    fn on_timeout(&mut self, id: ThreadId) {
        self.stats.timeouts = self.stats.timeouts.wrapping_add(1);
        self.emit_trace(thread_records::TIMEOUT, &[id.index() as u8]);
        log::debug!("{} wait timed out at {}", id, self.now());

        let reason = match self.threads.tcb(id).blocked_on {
            Some(BlockedOn::Sleep) => WakeReason::Granted,
            _ => WakeReason::TimedOut,
        };
        self.abort_wait(id, reason);
    }

    // ------------------------------------------------------------------
    // Blocking and waking
    // ------------------------------------------------------------------

    /// Marks the running thread blocked on `on` until woken or `deadline`.
    ///
    /// The caller links the thread into the object's wait queue afterwards.
    pub(crate) fn block_current(&mut self, on: BlockedOn, deadline: Option<Tick>) -> KResult<()> {
        let id = self.current;
        if id == self.idle || self.threads.tcb(id).state != ThreadState::Running {
            return Err(KernelError::InvalidState);
        }
        if let Some(deadline) = deadline {
            if self.now().has_reached(deadline) {
                return Err(KernelError::Timeout);
            }
        }

        let tcb = self.threads.tcb_mut(id);
        tcb.state = ThreadState::Blocked;
        tcb.blocked_on = Some(on);
        tcb.deadline = deadline;
        tcb.wake = None;
        tcb.rotate = false;
        if let Some(deadline) = deadline {
            self.arm_timer(id, deadline);
        }

        self.emit_trace(thread_records::BLOCK, &[id.index() as u8]);
        self.request_reschedule();
        Ok(())
    }

    /// Moves a blocked thread (already out of any wait queue) to Ready with
    /// `reason` as its wait result.
    pub(crate) fn wake(&mut self, id: ThreadId, reason: WakeReason) {
        self.cancel_timer(id);

        let tcb = self.threads.tcb_mut(id);
        tcb.state = ThreadState::Ready;
        tcb.blocked_on = None;
        tcb.wake = Some(reason);
        let priority = tcb.effective_priority;

        // Woken before it was switched out: it keeps the head of its level.
        if id == self.current {
            self.ready.push_front(&mut self.threads, id, priority);
        } else {
            self.ready.push_back(&mut self.threads, id, priority);
        }

        self.emit_trace(thread_records::WAKE, &[id.index() as u8]);
        self.check_preemption();
    }

    /// Ends the wait of a blocked thread early with `reason`, undoing its
    /// wait-queue membership.
    fn abort_wait(&mut self, id: ThreadId, reason: WakeReason) {
        let Some(on) = self.threads.tcb(id).blocked_on else {
            return;
        };

        match on {
            BlockedOn::Mutex(mutex) => {
                self.objects
                    .held_mutex_mut(mutex)
                    .wait
                    .remove(&mut self.threads, id);
                self.wake(id, reason);
                let owner = self.objects.held_mutex(mutex).owner;
                if let Some(owner) = owner {
                    self.refresh_priority(owner);
                }
            }
            BlockedOn::Semaphore(semaphore) => {
                if let Ok(state) = self.objects.semaphore_mut(semaphore) {
                    state.wait.remove(&mut self.threads, id);
                }
                self.wake(id, reason);
            }
            BlockedOn::CondVar { condvar, mutex } => {
                if let Ok(state) = self.objects.condvar_mut(condvar) {
                    state.wait.remove(&mut self.threads, id);
                }
                self.reacquire_after_wait(id, mutex, reason);
            }
            BlockedOn::Join(target) => {
                if let Some(tcb) = self.threads.get_mut(target) {
                    tcb.joiner = None;
                }
                self.wake(id, reason);
            }
            BlockedOn::Signals(_) | BlockedOn::Sleep | BlockedOn::Parked => {
                self.wake(id, reason);
            }
        }
    }

    /// Force-unblocks `id`; its wait reports `Interrupted`.
    ///
    /// Fails with `InvalidState` if the thread is not blocked, or if it is
    /// reacquiring a mutex after a condition wait (it must return holding
    /// the mutex).
    pub fn interrupt(&mut self, id: ThreadId) -> KResult<()> {
        let tcb = self.threads.lookup(id)?;
        if tcb.state != ThreadState::Blocked || tcb.stashed.is_some() {
            return Err(KernelError::InvalidState);
        }
        log::debug!("interrupting {}", id);
        self.abort_wait(id, WakeReason::Interrupted);
        Ok(())
    }

    /// Result of the running thread's last wait.
    ///
    /// Call once after an operation returned [`Wait::Blocked`] and the thread
    /// runs again. `InvalidState` if there is no finished wait to collect.
    pub fn complete_wait(&mut self) -> KResult<()> {
        self.take_wake()?.into_result()
    }

    /// Like [`complete_wait`](Self::complete_wait), returning the delivered
    /// signal number.
    pub fn complete_signal_wait(&mut self) -> KResult<u8> {
        match self.take_wake()? {
            WakeReason::Signal(signal) => Ok(signal),
            WakeReason::Granted | WakeReason::Joined(_) => Err(KernelError::InvalidState),
            other => other.into_result().map(|()| 0),
        }
    }

    /// Like [`complete_wait`](Self::complete_wait), returning the joined
    /// thread's exit code.
    pub fn complete_join(&mut self) -> KResult<usize> {
        match self.take_wake()? {
            WakeReason::Joined(code) => Ok(code),
            WakeReason::Granted | WakeReason::Signal(_) => Err(KernelError::InvalidState),
            other => other.into_result().map(|()| 0),
        }
    }

    fn take_wake(&mut self) -> KResult<WakeReason> {
        let tcb = self.threads.tcb_mut(self.current);
        if tcb.state != ThreadState::Running {
            return Err(KernelError::InvalidState);
        }
        tcb.wake.take().ok_or(KernelError::InvalidState)
    }

    // ------------------------------------------------------------------
    // Thread lifecycle
    // ------------------------------------------------------------------

    /// Allocates a thread in the Created state.
    ///
    /// The priority must lie in `[1, LEVELS)`.
    pub fn create_thread(&mut self, config: ThreadConfig) -> KResult<ThreadId> {
        if !config.priority.is_valid_for(LEVELS) {
            return Err(KernelError::InvalidArgument);
        }
        let id = self
            .threads
            .allocate(&config, self.config.round_robin_quantum)?;

        self.emit_trace(thread_records::CREATE, &[id.index() as u8, config.priority.raw()]);
        log::debug!("created {} '{}' at {}", id, config.name, config.priority);
        Ok(id)
    }

    /// Makes a Created thread ready to run.
    pub fn start_thread(&mut self, id: ThreadId) -> KResult<()> {
        let tcb = self.threads.lookup_mut(id)?;
        if tcb.state != ThreadState::Created {
            return Err(KernelError::InvalidState);
        }
        tcb.state = ThreadState::Ready;
        let priority = tcb.effective_priority;
        self.ready.push_back(&mut self.threads, id, priority);
        self.check_preemption();
        Ok(())
    }

    /// Creates and starts a thread.
    pub fn spawn(&mut self, config: ThreadConfig) -> KResult<ThreadId> {
        let id = self.create_thread(config)?;
        self.start_thread(id)?;
        Ok(id)
    }

    pub(crate) fn set_context(&mut self, id: ThreadId, context: ContextPtr) -> KResult<()> {
        self.threads.lookup_mut(id)?.context = context;
        Ok(())
    }

    /// Terminates the running thread with `code`.
    ///
    /// A waiting joiner is woken with the code. Fails with `InvalidState`
    /// for the idle thread or while the thread still owns mutexes.
    pub fn exit_current(&mut self, code: usize) -> KResult<()> {
        let id = self.current;
        let tcb = self.threads.tcb_mut(id);
        if id == self.idle || tcb.state != ThreadState::Running || tcb.owned_mutexes.is_some() {
            return Err(KernelError::InvalidState);
        }

        tcb.state = ThreadState::Terminated;
        tcb.exit_code = code;
        let joiner = tcb.joiner.take();
        if joiner.is_some() {
            tcb.collected = true;
        }

        self.emit_trace(thread_records::EXIT, &[id.index() as u8]);
        log::debug!("{} exited with {}", id, code);

        if let Some(joiner) = joiner {
            self.wake(joiner, WakeReason::Joined(code));
        }
        self.request_reschedule();
        Ok(())
    }

    /// Waits for `target` to terminate and returns its exit code.
    ///
    /// Only one thread may join a given thread. Joining yourself is
    /// `Deadlock`; joining a detached thread is `InvalidState`.
    pub fn join(&mut self, target: ThreadId, timeout: Timeout) -> KResult<Wait<usize>> {
        if target == self.current {
            return Err(KernelError::Deadlock);
        }
        if target == self.idle {
            return Err(KernelError::InvalidArgument);
        }

        let tcb = self.threads.lookup(target)?;
        if tcb.detached || tcb.joiner.is_some() {
            return Err(KernelError::InvalidState);
        }
        if tcb.state == ThreadState::Terminated {
            let code = tcb.exit_code;
            self.threads.release(target);
            return Ok(Wait::Done(code));
        }

        let deadline = timeout.deadline(self.now());
        self.block_current(BlockedOn::Join(target), deadline)?;
        self.threads.tcb_mut(target).joiner = Some(self.current);
        Ok(Wait::Blocked)
    }

    /// Releases `id`'s slot as soon as it terminates; it can no longer be
    /// joined.
    pub fn detach(&mut self, id: ThreadId) -> KResult<()> {
        if id == self.idle {
            return Err(KernelError::InvalidArgument);
        }
        let tcb = self.threads.lookup_mut(id)?;
        if tcb.detached || tcb.joiner.is_some() {
            return Err(KernelError::InvalidState);
        }
        tcb.detached = true;

        if tcb.state == ThreadState::Terminated && id != self.current {
            self.threads.release(id);
        }
        Ok(())
    }

    /// Blocks the running thread until `timeout` elapses.
    ///
    /// `Timeout::Forever` is rejected; use [`suspend_current`](Self::suspend_current)
    /// to park indefinitely.
    pub fn sleep(&mut self, timeout: Timeout) -> KResult<Wait<()>> {
        let Some(deadline) = timeout.deadline(self.now()) else {
            return Err(KernelError::InvalidArgument);
        };
        if self.now().has_reached(deadline) {
            return Ok(Wait::Done(()));
        }
        self.block_current(BlockedOn::Sleep, Some(deadline))?;
        Ok(Wait::Blocked)
    }

    /// Parks the running thread until [`resume`](Self::resume) or `timeout`.
    pub fn suspend_current(&mut self, timeout: Timeout) -> KResult<Wait<()>> {
        let deadline = timeout.deadline(self.now());
        self.block_current(BlockedOn::Parked, deadline)?;
        Ok(Wait::Blocked)
    }

    /// Wakes a parked thread.
    pub fn resume(&mut self, id: ThreadId) -> KResult<()> {
        let tcb = self.threads.lookup(id)?;
        if tcb.blocked_on != Some(BlockedOn::Parked) {
            return Err(KernelError::InvalidState);
        }
        self.wake(id, WakeReason::Granted);
        Ok(())
    }

    /// Gives up the CPU to the next thread of the same priority, if any.
    pub fn yield_now(&mut self) {
        self.threads.tcb_mut(self.current).rotate = true;
        self.request_reschedule();
    }

    // ------------------------------------------------------------------
    // Tracing
    // ------------------------------------------------------------------

    pub(crate) fn emit_trace(&self, record: u8, payload: &[u8]) {
        if let Some(hook) = self.config.trace_hook {
            hook(record, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Sched = Scheduler<8, 8, 8>;

    fn entry() -> ThreadEntry {
        ThreadEntry::new(|arg| arg, 0)
    }

    fn config(name: &'static str, priority: u8) -> ThreadConfig {
        ThreadConfig::new(name, Priority::new(priority), entry())
    }

    fn scheduler() -> Sched {
        Sched::new(KernelConfig::default()).unwrap()
    }

    fn run(sched: &mut Sched) -> ThreadId {
        sched.switch_context(ContextPtr::NULL);
        sched.current()
    }

    #[test]
    fn idle_runs_when_nothing_else_is_ready() {
        let mut sched = scheduler();
        let idle = sched.idle_thread();
        assert_eq!(sched.current(), idle);
        assert_eq!(sched.select_next(), idle);

        sched.tick();
        assert_eq!(sched.select_next(), idle);
        assert!(!sched.is_switch_pending());
    }

    #[test]
    fn levels_outside_bitmap_rejected() {
        let result = Scheduler::<4, 4, 65>::new(KernelConfig::default());
        assert_eq!(result.unwrap_err(), KernelError::InvalidArgument);
        let result = Scheduler::<4, 4, 1>::new(KernelConfig::default());
        assert_eq!(result.unwrap_err(), KernelError::InvalidArgument);
    }

    #[test]
    fn create_validates_priority() {
        let mut sched = scheduler();
        assert_eq!(
            sched.create_thread(config("zero", 0)).unwrap_err(),
            KernelError::InvalidArgument
        );
        assert_eq!(
            sched.create_thread(config("high", 8)).unwrap_err(),
            KernelError::InvalidArgument
        );
        let id = sched.create_thread(config("ok", 7)).unwrap();
        assert_eq!(sched.thread(id).unwrap().state(), ThreadState::Created);
        assert_eq!(sched.start_thread(id), Ok(()));
        assert_eq!(sched.start_thread(id), Err(KernelError::InvalidState));
    }

    #[test]
    fn higher_priority_start_requests_switch() {
        let mut sched = scheduler();
        let a = sched.spawn(config("a", 3)).unwrap();
        assert!(sched.is_switch_pending());
        assert_eq!(run(&mut sched), a);
        assert!(!sched.is_switch_pending());
        assert_eq!(sched.thread(a).unwrap().state(), ThreadState::Running);

        // Equal priority does not preempt.
        let b = sched.spawn(config("b", 3)).unwrap();
        assert!(!sched.is_switch_pending());
        assert_eq!(sched.select_next(), a);

        let c = sched.spawn(config("c", 5)).unwrap();
        assert!(sched.is_switch_pending());
        assert_eq!(run(&mut sched), c);

        // The preempted thread kept the head of its level.
        let order: Vec<ThreadId> = sched.ready_at(Priority::new(3)).collect();
        assert_eq!(order, [a, b]);
    }

    #[test]
    fn context_pointers_are_exchanged() {
        let mut sched = scheduler();
        let a = sched.spawn(config("a", 2)).unwrap();
        sched.set_context(a, ContextPtr(0x2000)).unwrap();

        let incoming = sched.switch_context(ContextPtr(0x1000));
        assert_eq!(incoming, ContextPtr(0x2000));
        let idle = sched.idle_thread();
        assert_eq!(sched.thread(idle).unwrap().context(), ContextPtr(0x1000));
    }

    #[test]
    fn yield_rotates_within_level() {
        let mut sched = scheduler();
        let a = sched.spawn(config("a", 2)).unwrap();
        let b = sched.spawn(config("b", 2)).unwrap();
        assert_eq!(run(&mut sched), a);

        sched.yield_now();
        assert_eq!(run(&mut sched), b);
        sched.yield_now();
        assert_eq!(run(&mut sched), a);
    }

    #[test]
    fn yield_without_peers_keeps_running() {
        let mut sched = scheduler();
        let a = sched.spawn(config("a", 2)).unwrap();
        assert_eq!(run(&mut sched), a);
        sched.yield_now();
        assert_eq!(run(&mut sched), a);
        assert_eq!(sched.thread(a).unwrap().quantum(), 10);
    }

    #[test]
    fn sleep_wakes_after_deadline() {
        let mut sched = scheduler();
        let a = sched.spawn(config("a", 2)).unwrap();
        run(&mut sched);

        assert_eq!(sched.sleep(Timeout::After(3)), Ok(Wait::Blocked));
        assert_eq!(run(&mut sched), sched.idle_thread());

        sched.tick();
        sched.tick();
        assert_eq!(sched.thread(a).unwrap().state(), ThreadState::Blocked);
        sched.tick();
        assert_eq!(sched.thread(a).unwrap().state(), ThreadState::Ready);
        assert!(sched.is_switch_pending());

        assert_eq!(run(&mut sched), a);
        assert_eq!(sched.complete_wait(), Ok(()));
        assert_eq!(sched.complete_wait(), Err(KernelError::InvalidState));
    }

    #[test]
    fn sleep_argument_edges() {
        let mut sched = scheduler();
        sched.spawn(config("a", 2)).unwrap();
        run(&mut sched);

        assert_eq!(sched.sleep(Timeout::Forever), Err(KernelError::InvalidArgument));
        assert_eq!(sched.sleep(Timeout::After(0)), Ok(Wait::Done(())));
    }

    #[test]
    fn idle_thread_cannot_block() {
        let mut sched = scheduler();
        assert_eq!(
            sched.suspend_current(Timeout::Forever),
            Err(KernelError::InvalidState)
        );
        assert_eq!(sched.exit_current(0), Err(KernelError::InvalidState));
    }

    #[test]
    fn timers_expire_in_deadline_order() {
        let mut sched = scheduler();
        let a = sched.spawn(config("a", 3)).unwrap();
        let b = sched.spawn(config("b", 2)).unwrap();

        assert_eq!(run(&mut sched), a);
        assert_eq!(sched.suspend_current(Timeout::After(5)), Ok(Wait::Blocked));
        assert_eq!(run(&mut sched), b);
        assert_eq!(sched.suspend_current(Timeout::After(2)), Ok(Wait::Blocked));
        run(&mut sched);

        sched.tick();
        sched.tick();
        assert_eq!(sched.thread(b).unwrap().state(), ThreadState::Ready);
        assert_eq!(sched.thread(a).unwrap().state(), ThreadState::Blocked);
        for _ in 0..3 {
            sched.tick();
        }
        assert_eq!(sched.thread(a).unwrap().state(), ThreadState::Ready);
        assert_eq!(sched.stats().timeouts, 2);

        assert_eq!(run(&mut sched), a);
        assert_eq!(sched.complete_wait(), Err(KernelError::Timeout));
    }

    #[test]
    fn park_resume_and_interrupt() {
        let mut sched = scheduler();
        let a = sched.spawn(config("a", 2)).unwrap();
        run(&mut sched);

        assert_eq!(sched.suspend_current(Timeout::Forever), Ok(Wait::Blocked));
        run(&mut sched);
        assert_eq!(sched.interrupt(sched.idle_thread()), Err(KernelError::InvalidState));
        sched.resume(a).unwrap();
        assert_eq!(sched.resume(a), Err(KernelError::InvalidState));
        assert_eq!(run(&mut sched), a);
        assert_eq!(sched.complete_wait(), Ok(()));

        assert_eq!(sched.suspend_current(Timeout::Forever), Ok(Wait::Blocked));
        run(&mut sched);
        sched.interrupt(a).unwrap();
        assert_eq!(run(&mut sched), a);
        assert_eq!(sched.complete_wait(), Err(KernelError::Interrupted));
    }

    #[test]
    fn join_collects_exit_code_and_frees_slot() {
        let mut sched = scheduler();
        let parent = sched.spawn(config("parent", 4)).unwrap();
        let child = sched.spawn(config("child", 2)).unwrap();
        assert_eq!(run(&mut sched), parent);

        assert_eq!(sched.join(parent, Timeout::Forever), Err(KernelError::Deadlock));
        assert_eq!(sched.join(child, Timeout::Forever), Ok(Wait::Blocked));
        assert_eq!(run(&mut sched), child);

        sched.exit_current(42).unwrap();
        assert_eq!(sched.thread(parent).unwrap().state(), ThreadState::Ready);
        assert_eq!(run(&mut sched), parent);
        assert_eq!(sched.complete_join(), Ok(42));

        // Slot reclaimed at the switch away from the exited thread.
        assert_eq!(sched.thread(child).unwrap_err(), KernelError::InvalidState);
        assert_eq!(sched.thread_count(), 2);
    }

    #[test]
    fn join_after_exit_returns_immediately() {
        let mut sched = scheduler();
        let child = sched.spawn(config("child", 4)).unwrap();
        let parent = sched.spawn(config("parent", 2)).unwrap();
        assert_eq!(run(&mut sched), child);
        sched.exit_current(7).unwrap();
        assert_eq!(run(&mut sched), parent);

        assert_eq!(sched.thread(child).unwrap().state(), ThreadState::Terminated);
        assert_eq!(sched.join(child, Timeout::Forever), Ok(Wait::Done(7)));
        assert_eq!(sched.join(child, Timeout::Forever), Err(KernelError::InvalidState));
    }

    #[test]
    fn detached_thread_reaped_on_switch() {
        let mut sched = scheduler();
        let a = sched.spawn(config("a", 2)).unwrap();
        sched.detach(a).unwrap();
        assert_eq!(sched.detach(a), Err(KernelError::InvalidState));
        assert_eq!(run(&mut sched), a);

        sched.exit_current(0).unwrap();
        assert_eq!(run(&mut sched), sched.idle_thread());
        assert_eq!(sched.thread(a).unwrap_err(), KernelError::InvalidState);
        assert_eq!(sched.thread_count(), 1);
    }

    #[test]
    fn join_timeout_clears_joiner() {
        let mut sched = scheduler();
        let parent = sched.spawn(config("parent", 4)).unwrap();
        let child = sched.spawn(config("child", 2)).unwrap();
        run(&mut sched);

        assert_eq!(sched.join(child, Timeout::After(1)), Ok(Wait::Blocked));
        run(&mut sched);
        sched.tick();
        assert_eq!(run(&mut sched), parent);
        assert_eq!(sched.complete_join(), Err(KernelError::Timeout));

        // Another join attempt is allowed again.
        assert_eq!(sched.join(child, Timeout::Forever), Ok(Wait::Blocked));
    }

    #[test]
    fn trace_hook_sees_switches() {
        use std::sync::atomic::{AtomicU32, Ordering};
        static SWITCHES: AtomicU32 = AtomicU32::new(0);

        fn hook(record: u8, _: &[u8]) {
            if record == sched::NEXT {
                SWITCHES.fetch_add(1, Ordering::Relaxed);
            }
        }

        let config = KernelConfig::builder().trace_hook(hook).build().unwrap();
        let mut sched = Sched::new(config).unwrap();
        sched.spawn(ThreadConfig::new("a", Priority::new(1), entry())).unwrap();
        run(&mut sched);
        assert_eq!(SWITCHES.load(Ordering::Relaxed), 1);
    }
}
