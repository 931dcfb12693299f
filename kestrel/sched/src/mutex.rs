//! Mutexes with priority inheritance and priority protection.
//!
//! Every thread keeps an intrusive list of the mutexes it owns. Its
//! effective priority is recomputed from that list whenever a waiter
//! arrives, leaves or changes priority:
//!
//! ```text
//! effective = max(base,
//!                 highest waiter of every owned inheritance mutex,
//!                 ceiling of every owned protect mutex)
//! ```
//!
//! A change propagates along the chain "owner is blocked on a mutex owned by
//! ..." iteratively, at most `max_inheritance_depth` steps.

use kestrel_core::trace::records::mutex as records;
use kestrel_core::{KResult, KernelError, Priority, Timeout};

use crate::object::MutexId;
use crate::scheduler::{Scheduler, Wait};
use crate::thread::{BlockedOn, ThreadId, ThreadState, WakeReason};
use crate::wait::WaitQueue;

/// Behaviour when the owner locks the mutex again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MutexKind {
    /// Relocking by the owner is `Deadlock`.
    #[default]
    Normal,
    /// The owner may lock again; it must unlock as many times.
    Recursive,
}

/// Priority protocol of a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MutexProtocol {
    /// No priority adjustment.
    None,
    /// The owner inherits the priority of its most urgent waiter.
    #[default]
    Inheritance,
    /// The owner runs at least at the ceiling while holding the mutex.
    Protect(Priority),
}

#[derive(Debug)]
pub(crate) struct MutexState {
    pub(crate) owner: Option<ThreadId>,
    pub(crate) recursion: u16,
    pub(crate) kind: MutexKind,
    pub(crate) protocol: MutexProtocol,
    pub(crate) wait: WaitQueue,
    /// Next mutex in the owner's owned list
    pub(crate) next_owned: Option<MutexId>,
}

impl MutexState {
    pub(crate) fn new(kind: MutexKind, protocol: MutexProtocol) -> Self {
        Self {
            owner: None,
            recursion: 0,
            kind,
            protocol,
            wait: WaitQueue::new(),
            next_owned: None,
        }
    }
}

/// Snapshot of a mutex for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MutexInfo {
    pub owner: Option<ThreadId>,
    pub recursion: u16,
    pub waiters: usize,
    pub kind: MutexKind,
    pub protocol: MutexProtocol,
}

impl<const THREADS: usize, const OBJECTS: usize, const LEVELS: usize>
    Scheduler<THREADS, OBJECTS, LEVELS>
{
    /// Creates a mutex. A protect ceiling must be a valid thread priority.
    pub fn create_mutex(&mut self, kind: MutexKind, protocol: MutexProtocol) -> KResult<MutexId> {
        if let MutexProtocol::Protect(ceiling) = protocol {
            if !ceiling.is_valid_for(LEVELS) {
                return Err(KernelError::InvalidArgument);
            }
        }
        self.objects.insert_mutex(MutexState::new(kind, protocol))
    }

    /// Destroys an unowned mutex that no condition waiter will reacquire.
    pub fn destroy_mutex(&mut self, mutex: MutexId) -> KResult<()> {
        if self.objects.mutex(mutex)?.owner.is_some() {
            return Err(KernelError::InvalidState);
        }
        let awaited = self.threads.iter().any(|tcb| {
            matches!(tcb.blocked_on, Some(BlockedOn::CondVar { mutex: m, .. }) if m == mutex)
        });
        if awaited {
            return Err(KernelError::InvalidState);
        }
        self.objects.remove_mutex(mutex);
        Ok(())
    }

    pub fn mutex_info(&self, mutex: MutexId) -> KResult<MutexInfo> {
        let state = self.objects.mutex(mutex)?;
        Ok(MutexInfo {
            owner: state.owner,
            recursion: state.recursion,
            waiters: state.wait.len(),
            kind: state.kind,
            protocol: state.protocol,
        })
    }

    /// Threads waiting for `mutex`, most urgent first.
    pub fn mutex_waiters(&self, mutex: MutexId) -> KResult<impl Iterator<Item = ThreadId> + '_> {
        Ok(self.objects.mutex(mutex)?.wait.iter(&self.threads))
    }

    /// Locks `mutex` for the running thread, blocking up to `timeout`.
    ///
    /// Before blocking, the chain of owners is walked: reaching the caller
    /// is `Deadlock`, and an inheritance chain longer than
    /// `max_inheritance_depth` is `ChainTooDeep`. In both cases the caller
    /// is not queued.
    pub fn mutex_lock(&mut self, mutex: MutexId, timeout: Timeout) -> KResult<Wait<()>> {
        let caller = self.current();
        if self.try_acquire(caller, mutex)? {
            return Ok(Wait::Done(()));
        }

        self.check_inheritance_chain(caller, mutex)?;
        let deadline = timeout.deadline(self.now());
        self.block_current(BlockedOn::Mutex(mutex), deadline)?;

        let state = self.objects.held_mutex_mut(mutex);
        state.wait.enqueue(&mut self.threads, caller);
        let owner = state.owner;
        if let Some(owner) = owner {
            self.refresh_priority(owner);
        }
        Ok(Wait::Blocked)
    }

    /// Locks `mutex` only if that does not require blocking.
    pub fn mutex_try_lock(&mut self, mutex: MutexId) -> KResult<()> {
        let caller = self.current();
        if self.try_acquire(caller, mutex)? {
            Ok(())
        } else {
            Err(KernelError::WouldBlock)
        }
    }

    /// Unlocks `mutex`. At recursion zero ownership passes directly to the
    /// most urgent waiter.
    pub fn mutex_unlock(&mut self, mutex: MutexId) -> KResult<()> {
        let caller = self.current();
        let state = self.objects.mutex_mut(mutex)?;
        if state.owner != Some(caller) {
            return Err(KernelError::NotOwner);
        }

        state.recursion -= 1;
        if state.recursion == 0 {
            self.release_mutex(mutex);
        }
        Ok(())
    }

    /// Acquires `mutex` for `caller` if it is free or already owned by it.
    /// `Ok(false)` means the caller has to wait.
    fn try_acquire(&mut self, caller: ThreadId, mutex: MutexId) -> KResult<bool> {
        let effective = self.threads.tcb(caller).effective_priority;
        let state = self.objects.mutex_mut(mutex)?;

        if let MutexProtocol::Protect(ceiling) = state.protocol {
            if effective > ceiling {
                return Err(KernelError::InvalidArgument);
            }
        }

        let owner = state.owner;
        match owner {
            None => {
                self.grant(mutex, caller);
                Ok(true)
            }
            Some(owner) if owner == caller => match state.kind {
                MutexKind::Normal => Err(KernelError::Deadlock),
                MutexKind::Recursive => {
                    state.recursion = state.recursion.checked_add(1).ok_or(KernelError::Overflow)?;
                    Ok(true)
                }
            },
            Some(_) => Ok(false),
        }
    }

    /// Makes `thread` the owner of a free mutex and applies its protocol.
    fn grant(&mut self, mutex: MutexId, thread: ThreadId) {
        let tcb = self.threads.tcb_mut(thread);
        let state = self.objects.held_mutex_mut(mutex);
        state.owner = Some(thread);
        state.recursion = 1;
        state.next_owned = tcb.owned_mutexes.replace(mutex);
        self.refresh_priority(thread);
    }

    /// Releases a mutex whose recursion count reached zero.
    pub(crate) fn release_mutex(&mut self, mutex: MutexId) {
        let state = self.objects.held_mutex_mut(mutex);
        let Some(releaser) = state.owner.take() else {
            return;
        };
        state.recursion = 0;
        self.unlink_owned(releaser, mutex);

        let state = self.objects.held_mutex_mut(mutex);
        if let Some(waiter) = state.wait.pop_highest(&mut self.threads) {
            let reason = self
                .threads
                .tcb_mut(waiter)
                .stashed
                .take()
                .unwrap_or(WakeReason::Granted);
            self.emit_trace(records::HANDOFF, &[mutex.object().index() as u8, waiter.index() as u8]);
            log::trace!("{} handed to {}", mutex, waiter);
            self.grant(mutex, waiter);
            self.wake(waiter, reason);
        }

        self.refresh_priority(releaser);
    }

    /// Takes `mutex` for a thread leaving a condition wait, or queues it
    /// behind the current owner. `reason` is reported once the mutex is held.
    pub(crate) fn reacquire_after_wait(&mut self, thread: ThreadId, mutex: MutexId, reason: WakeReason) {
        // Reacquisition is unbounded: the thread must return holding the mutex.
        self.cancel_timer(thread);
        let owner = self.objects.held_mutex(mutex).owner;
        match owner {
            None => {
                self.grant(mutex, thread);
                self.wake(thread, reason);
            }
            Some(owner) => {
                self.objects
                    .held_mutex_mut(mutex)
                    .wait
                    .enqueue(&mut self.threads, thread);
                let tcb = self.threads.tcb_mut(thread);
                tcb.blocked_on = Some(BlockedOn::Mutex(mutex));
                tcb.stashed = Some(reason);
                self.refresh_priority(owner);
            }
        }
    }

    fn unlink_owned(&mut self, thread: ThreadId, mutex: MutexId) {
        let next = self.objects.held_mutex_mut(mutex).next_owned.take();
        let tcb = self.threads.tcb_mut(thread);
        if tcb.owned_mutexes == Some(mutex) {
            tcb.owned_mutexes = next;
            return;
        }

        let mut cursor = tcb.owned_mutexes;
        while let Some(held) = cursor {
            let state = self.objects.held_mutex_mut(held);
            if state.next_owned == Some(mutex) {
                state.next_owned = next;
                return;
            }
            cursor = state.next_owned;
        }
        kestrel_core::fatal::raise(kestrel_core::FatalError::OwnershipCorrupted {
            object: mutex.object().index(),
        });
    }

    /// Walks the ownership chain starting at `mutex`'s owner.
    ///
    /// Under inheritance the chain the caller would join counts the links
    /// already queued behind the caller as well as those ahead of it.
    fn check_inheritance_chain(&self, caller: ThreadId, mutex: MutexId) -> KResult<()> {
        let inherits = self.objects.held_mutex(mutex).protocol == MutexProtocol::Inheritance;
        let max_depth = usize::from(self.config.max_inheritance_depth);

        let mut owner = self.objects.held_mutex(mutex).owner;
        let mut ahead = 0;
        while let Some(thread) = owner {
            if thread == caller {
                return Err(KernelError::Deadlock);
            }
            ahead += 1;
            if ahead > THREADS {
                break;
            }
            owner = match self.threads.tcb(thread).blocked_on {
                Some(BlockedOn::Mutex(next)) => self.objects.held_mutex(next).owner,
                _ => None,
            };
        }

        if inherits {
            let length = ahead + self.inheritance_behind(caller);
            if length > max_depth {
                log::debug!(
                    "inheritance chain through {} has {} links, limit {}",
                    caller,
                    length,
                    max_depth
                );
                return Err(KernelError::ChainTooDeep);
            }
        }
        Ok(())
    }

    /// Longest run of inheritance links that ends at `target`.
    fn inheritance_behind(&self, target: ThreadId) -> usize {
        let mut longest = 0;
        for tcb in self.threads.iter() {
            let mut thread = tcb.id;
            let mut links = 0;
            while links < THREADS {
                let Some(BlockedOn::Mutex(mutex)) = self.threads.tcb(thread).blocked_on else {
                    break;
                };
                let state = self.objects.held_mutex(mutex);
                let Some(owner) = state.owner else {
                    break;
                };
                if state.protocol != MutexProtocol::Inheritance {
                    break;
                }
                links += 1;
                if owner == target {
                    longest = longest.max(links);
                    break;
                }
                thread = owner;
            }
        }
        longest
    }

    /// Priority `thread` is entitled to from its base and owned mutexes.
    fn compute_effective(&self, thread: ThreadId) -> Priority {
        let tcb = self.threads.tcb(thread);
        let mut effective = tcb.base_priority;
        let mut cursor = tcb.owned_mutexes;
        while let Some(mutex) = cursor {
            let state = self.objects.held_mutex(mutex);
            match state.protocol {
                MutexProtocol::Inheritance => {
                    if let Some(waiter) = state.wait.highest_priority(&self.threads) {
                        effective = effective.max(waiter);
                    }
                }
                MutexProtocol::Protect(ceiling) => effective = effective.max(ceiling),
                MutexProtocol::None => {}
            }
            cursor = state.next_owned;
        }
        effective
    }

    /// Recomputes `start`'s effective priority and pushes the change along
    /// the chain of owners it is blocked behind.
    ///
    /// Lock-time checks keep chains within `max_inheritance_depth`; the
    /// `THREADS` bound only stops a corrupted cycle.
    pub(crate) fn refresh_priority(&mut self, start: ThreadId) {
        let mut thread = start;
        for _ in 0..THREADS {
            let effective = self.compute_effective(thread);
            if !self.apply_effective(thread, effective) {
                break;
            }
            let next = match self.threads.tcb(thread).blocked_on {
                Some(BlockedOn::Mutex(mutex)) => self.objects.held_mutex(mutex).owner,
                _ => None,
            };
            match next {
                Some(owner) => thread = owner,
                None => break,
            }
        }
    }

    /// Sets the effective priority and repositions the thread in whatever
    /// queue it occupies. Returns false if nothing changed.
    fn apply_effective(&mut self, thread: ThreadId, effective: Priority) -> bool {
        let tcb = self.threads.tcb_mut(thread);
        let previous = tcb.effective_priority;
        if previous == effective {
            return false;
        }
        tcb.effective_priority = effective;
        let (state, blocked_on) = (tcb.state, tcb.blocked_on);

        match state {
            ThreadState::Ready => {
                self.ready.remove(&mut self.threads, thread, previous);
                self.ready.push_back(&mut self.threads, thread, effective);
            }
            ThreadState::Blocked => match blocked_on {
                Some(BlockedOn::Mutex(mutex)) => {
                    self.objects
                        .held_mutex_mut(mutex)
                        .wait
                        .reposition(&mut self.threads, thread);
                }
                Some(BlockedOn::Semaphore(semaphore)) => {
                    if let Ok(state) = self.objects.semaphore_mut(semaphore) {
                        state.wait.reposition(&mut self.threads, thread);
                    }
                }
                Some(BlockedOn::CondVar { condvar, .. }) => {
                    if let Ok(state) = self.objects.condvar_mut(condvar) {
                        state.wait.reposition(&mut self.threads, thread);
                    }
                }
                _ => {}
            },
            _ => {}
        }

        let record = if effective > previous {
            records::BOOST
        } else {
            records::UNWIND
        };
        self.emit_trace(record, &[thread.index() as u8, previous.raw(), effective.raw()]);
        log::debug!("{} priority {} -> {}", thread, previous, effective);

        self.check_preemption();
        true
    }
}
