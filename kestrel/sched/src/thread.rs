//! Thread control blocks and the fixed-size thread table.

use core::fmt;

use kestrel_core::fatal::{self, FatalError};
use kestrel_core::{KResult, KernelError, Priority, Tick};

use crate::list::{Link, LinkKind, LinkStore};
use crate::object::{CondVarId, MutexId, SemaphoreId};

/// Thread identifier: table slot plus a generation that changes every time
/// the slot is reused, so stale handles are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThreadId {
    index: u16,
    generation: u16,
}

impl ThreadId {
    pub(crate) const fn new(index: u16, generation: u16) -> Self {
        Self { index, generation }
    }

    /// Slot index in the thread table
    pub const fn index(self) -> u16 {
        self.index
    }

    /// Slot generation
    pub const fn generation(self) -> u16 {
        self.generation
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}.{}", self.index, self.generation)
    }
}

/// Thread execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThreadState {
    /// Created but not started; not in any queue.
    Created,
    /// Runnable, waiting in the ready queue set.
    Ready,
    /// Currently executing.
    Running,
    /// Waiting on an object, a timeout or another thread.
    Blocked,
    /// Finished; the slot is released once no joiner references it.
    Terminated,
}

/// How a thread shares the CPU with threads of the same priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulingPolicy {
    /// Rotated behind same-priority peers when its quantum is used up.
    #[default]
    RoundRobin,
    /// Runs until it blocks, yields or is preempted by a higher priority.
    Fifo,
}

/// Opaque stack memory supplied by the creator of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StackRegion {
    pub base: usize,
    pub size: usize,
}

impl StackRegion {
    pub const fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }
}

/// Saved context (stack pointer) of a switched-out thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ContextPtr(pub usize);

impl ContextPtr {
    pub const NULL: ContextPtr = ContextPtr(0);
}

/// Thread entry point: called with `arg`, its return value is the exit code.
#[derive(Debug, Clone, Copy)]
pub struct ThreadEntry {
    pub function: fn(usize) -> usize,
    pub arg: usize,
}

impl ThreadEntry {
    pub const fn new(function: fn(usize) -> usize, arg: usize) -> Self {
        Self { function, arg }
    }

    /// Entry of the built-in idle thread.
    pub const fn idle() -> Self {
        Self::new(idle_loop, 0)
    }
}

fn idle_loop(_: usize) -> usize {
    loop {
        core::hint::spin_loop();
    }
}

/// Configuration for creating a thread.
#[derive(Debug, Clone, Copy)]
pub struct ThreadConfig {
    pub name: &'static str,
    pub priority: Priority,
    pub policy: SchedulingPolicy,
    pub stack: StackRegion,
    pub entry: ThreadEntry,
}

impl ThreadConfig {
    /// Creates a round-robin thread configuration.
    pub const fn new(name: &'static str, priority: Priority, entry: ThreadEntry) -> Self {
        Self {
            name,
            priority,
            policy: SchedulingPolicy::RoundRobin,
            stack: StackRegion::new(0, 0),
            entry,
        }
    }

    /// Sets the scheduling policy.
    pub const fn with_policy(mut self, policy: SchedulingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the stack region.
    pub const fn with_stack(mut self, stack: StackRegion) -> Self {
        self.stack = stack;
        self
    }
}

/// What a blocked thread is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockedOn {
    Mutex(MutexId),
    Semaphore(SemaphoreId),
    CondVar { condvar: CondVarId, mutex: MutexId },
    Join(ThreadId),
    Signals(u32),
    Sleep,
    Parked,
}

/// Why a blocked thread was made ready again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeReason {
    /// The awaited resource was handed over (or the sleep elapsed)
    Granted,
    /// A thread signal was delivered
    Signal(u8),
    /// The joined thread exited with this code
    Joined(usize),
    /// The deadline elapsed first
    TimedOut,
    /// The wait was force-unblocked
    Interrupted,
}

impl WakeReason {
    pub(crate) fn into_result(self) -> KResult<()> {
        match self {
            Self::Granted | Self::Signal(_) | Self::Joined(_) => Ok(()),
            Self::TimedOut => Err(KernelError::Timeout),
            Self::Interrupted => Err(KernelError::Interrupted),
        }
    }
}

/// Thread control block.
#[derive(Debug)]
pub struct Tcb {
    pub(crate) id: ThreadId,
    pub(crate) name: &'static str,
    pub(crate) state: ThreadState,
    pub(crate) base_priority: Priority,
    pub(crate) effective_priority: Priority,
    pub(crate) policy: SchedulingPolicy,
    pub(crate) quantum: u32,
    /// Go behind same-priority peers at the next switch
    pub(crate) rotate: bool,
    pub(crate) stack: StackRegion,
    pub(crate) entry: ThreadEntry,
    pub(crate) context: ContextPtr,
    pub(crate) queue_link: Link,
    pub(crate) timer_link: Link,
    pub(crate) blocked_on: Option<BlockedOn>,
    pub(crate) deadline: Option<Tick>,
    pub(crate) wake: Option<WakeReason>,
    /// Result to report once a condition wait has reacquired its mutex
    pub(crate) stashed: Option<WakeReason>,
    /// Head of the intrusive list of mutexes this thread owns
    pub(crate) owned_mutexes: Option<MutexId>,
    pub(crate) joiner: Option<ThreadId>,
    pub(crate) detached: bool,
    /// Exit status has been handed to a joiner
    pub(crate) collected: bool,
    pub(crate) exit_code: usize,
    pub(crate) pending_signals: u32,
}

impl Tcb {
    fn new(id: ThreadId, config: &ThreadConfig, quantum: u32) -> Self {
        Self {
            id,
            name: config.name,
            state: ThreadState::Created,
            base_priority: config.priority,
            effective_priority: config.priority,
            policy: config.policy,
            quantum,
            rotate: false,
            stack: config.stack,
            entry: config.entry,
            context: ContextPtr::NULL,
            queue_link: Link::default(),
            timer_link: Link::default(),
            blocked_on: None,
            deadline: None,
            wake: None,
            stashed: None,
            owned_mutexes: None,
            joiner: None,
            detached: false,
            collected: false,
            exit_code: 0,
            pending_signals: 0,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Priority the thread was created with
    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    /// Priority the scheduler currently uses (base plus any boost)
    pub fn effective_priority(&self) -> Priority {
        self.effective_priority
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// Remaining round-robin ticks
    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    pub fn stack(&self) -> StackRegion {
        self.stack
    }

    pub fn entry(&self) -> ThreadEntry {
        self.entry
    }

    pub fn context(&self) -> ContextPtr {
        self.context
    }

    pub fn blocked_on(&self) -> Option<BlockedOn> {
        self.blocked_on
    }

    pub fn deadline(&self) -> Option<Tick> {
        self.deadline
    }

    pub fn pending_signals(&self) -> u32 {
        self.pending_signals
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    #[cfg(test)]
    pub(crate) fn is_queued(&self) -> bool {
        self.queue_link.is_linked()
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u16,
    tcb: Option<Tcb>,
}

/// Fixed-size table of thread control blocks.
#[derive(Debug)]
pub(crate) struct ThreadTable<const N: usize> {
    slots: [Slot; N],
    live: usize,
}

impl<const N: usize> ThreadTable<N> {
    pub(crate) fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot::default()),
            live: 0,
        }
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    pub(crate) fn allocate(&mut self, config: &ThreadConfig, quantum: u32) -> KResult<ThreadId> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.tcb.is_none())
            .ok_or(KernelError::ResourceExhausted)?;

        let id = ThreadId::new(index as u16, slot.generation);
        slot.tcb = Some(Tcb::new(id, config, quantum));
        self.live += 1;
        Ok(id)
    }

    pub(crate) fn release(&mut self, id: ThreadId) {
        if let Some(slot) = self.slots.get_mut(id.index() as usize) {
            if slot.generation == id.generation() && slot.tcb.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.live -= 1;
            }
        }
    }

    pub(crate) fn get(&self, id: ThreadId) -> Option<&Tcb> {
        let slot = self.slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.tcb.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: ThreadId) -> Option<&mut Tcb> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.tcb.as_mut()
    }

    /// Caller-facing lookup: a stale handle is an error, not a crash.
    pub(crate) fn lookup(&self, id: ThreadId) -> KResult<&Tcb> {
        self.get(id).ok_or(KernelError::InvalidState)
    }

    pub(crate) fn lookup_mut(&mut self, id: ThreadId) -> KResult<&mut Tcb> {
        self.get_mut(id).ok_or(KernelError::InvalidState)
    }

    /// Internal lookup of a thread the scheduler itself references.
    pub(crate) fn tcb(&self, id: ThreadId) -> &Tcb {
        match self.get(id) {
            Some(tcb) => tcb,
            None => fatal::raise(FatalError::StaleLink { thread: id.index() }),
        }
    }

    pub(crate) fn tcb_mut(&mut self, id: ThreadId) -> &mut Tcb {
        match self.get_mut(id) {
            Some(tcb) => tcb,
            None => fatal::raise(FatalError::StaleLink { thread: id.index() }),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Tcb> + '_ {
        self.slots.iter().filter_map(|slot| slot.tcb.as_ref())
    }
}

impl<const N: usize> LinkStore for ThreadTable<N> {
    fn link(&self, id: ThreadId, kind: LinkKind) -> &Link {
        let tcb = self.tcb(id);
        match kind {
            LinkKind::Queue => &tcb.queue_link,
            LinkKind::Timer => &tcb.timer_link,
        }
    }

    fn link_mut(&mut self, id: ThreadId, kind: LinkKind) -> &mut Link {
        let tcb = self.tcb_mut(id);
        match kind {
            LinkKind::Queue => &mut tcb.queue_link,
            LinkKind::Timer => &mut tcb.timer_link,
        }
    }
}
