//! Condition variables.
//!
//! Notification moves waiters straight onto the associated mutex: a notified
//! thread is either granted the mutex at once or queued on it (raising the
//! owner under priority inheritance). It never runs without the mutex, and a
//! timeout or interrupt on the condition is reported only after the mutex is
//! held again.

use kestrel_core::{KResult, KernelError, Timeout};

use crate::object::{CondVarId, MutexId};
use crate::scheduler::{Scheduler, Wait};
use crate::thread::{BlockedOn, ThreadId, WakeReason};
use crate::wait::WaitQueue;

#[derive(Debug, Default)]
pub(crate) struct CondVarState {
    pub(crate) wait: WaitQueue,
}

impl CondVarState {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl<const THREADS: usize, const OBJECTS: usize, const LEVELS: usize>
    Scheduler<THREADS, OBJECTS, LEVELS>
{
    pub fn create_condvar(&mut self) -> KResult<CondVarId> {
        self.objects.insert_condvar(CondVarState::new())
    }

    /// Destroys a condition variable nobody waits on.
    pub fn destroy_condvar(&mut self, condvar: CondVarId) -> KResult<()> {
        if !self.objects.condvar(condvar)?.wait.is_empty() {
            return Err(KernelError::InvalidState);
        }
        self.objects.remove_condvar(condvar);
        Ok(())
    }

    /// Threads waiting on `condvar`, most urgent first.
    pub fn condvar_waiters(
        &self,
        condvar: CondVarId,
    ) -> KResult<impl Iterator<Item = ThreadId> + '_> {
        Ok(self.objects.condvar(condvar)?.wait.iter(&self.threads))
    }

    /// Releases `mutex` and waits on `condvar` up to `timeout`.
    ///
    /// The caller must own `mutex` exactly once (`NotOwner` /
    /// `InvalidState` otherwise). Whatever the outcome, the thread holds the
    /// mutex again when it collects the result.
    pub fn condvar_wait(
        &mut self,
        condvar: CondVarId,
        mutex: MutexId,
        timeout: Timeout,
    ) -> KResult<Wait<()>> {
        self.objects.condvar(condvar)?;
        let caller = self.current();
        let state = self.objects.mutex(mutex)?;
        if state.owner != Some(caller) {
            return Err(KernelError::NotOwner);
        }
        if state.recursion != 1 {
            return Err(KernelError::InvalidState);
        }

        let deadline = timeout.deadline(self.now());
        self.block_current(BlockedOn::CondVar { condvar, mutex }, deadline)?;
        self.objects
            .condvar_mut(condvar)?
            .wait
            .enqueue(&mut self.threads, caller);
        self.release_mutex(mutex);
        Ok(Wait::Blocked)
    }

    /// Moves the most urgent waiter onto its mutex.
    pub fn notify_one(&mut self, condvar: CondVarId) -> KResult<()> {
        let waiter = self
            .objects
            .condvar_mut(condvar)?
            .wait
            .pop_highest(&mut self.threads);
        if let Some(waiter) = waiter {
            self.morph_to_mutex(waiter);
        }
        Ok(())
    }

    /// Moves every waiter onto its mutex, most urgent first.
    pub fn notify_all(&mut self, condvar: CondVarId) -> KResult<()> {
        loop {
            let waiter = self
                .objects
                .condvar_mut(condvar)?
                .wait
                .pop_highest(&mut self.threads);
            match waiter {
                Some(waiter) => self.morph_to_mutex(waiter),
                None => return Ok(()),
            }
        }
    }

    fn morph_to_mutex(&mut self, waiter: ThreadId) {
        let Some(BlockedOn::CondVar { mutex, .. }) = self.threads.tcb(waiter).blocked_on else {
            return;
        };
        self.reacquire_after_wait(waiter, mutex, WakeReason::Granted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::{MutexKind, MutexProtocol};
    use crate::thread::{ContextPtr, ThreadConfig, ThreadEntry, ThreadState};
    use kestrel_core::{KernelConfig, Priority};

    type Sched = Scheduler<8, 8, 8>;

    fn spawn(sched: &mut Sched, priority: u8) -> ThreadId {
        let config = ThreadConfig::new("t", Priority::new(priority), ThreadEntry::new(|a| a, 0));
        sched.spawn(config).unwrap()
    }

    fn run(sched: &mut Sched) -> ThreadId {
        sched.switch_context(ContextPtr::NULL);
        sched.current()
    }

    fn setup() -> (Sched, CondVarId, MutexId) {
        let mut sched = Sched::new(KernelConfig::default()).unwrap();
        let cv = sched.create_condvar().unwrap();
        let m = sched
            .create_mutex(MutexKind::Normal, MutexProtocol::Inheritance)
            .unwrap();
        (sched, cv, m)
    }

    #[test]
    fn wait_requires_single_ownership() {
        let (mut sched, cv, m) = setup();
        spawn(&mut sched, 2);
        run(&mut sched);

        assert_eq!(sched.condvar_wait(cv, m, Timeout::Forever), Err(KernelError::NotOwner));

        let r = sched
            .create_mutex(MutexKind::Recursive, MutexProtocol::None)
            .unwrap();
        sched.mutex_lock(r, Timeout::Forever).unwrap();
        sched.mutex_lock(r, Timeout::Forever).unwrap();
        assert_eq!(sched.condvar_wait(cv, r, Timeout::Forever), Err(KernelError::InvalidState));
    }

    #[test]
    fn wait_releases_and_notify_regrants() {
        let (mut sched, cv, m) = setup();
        let waiter = spawn(&mut sched, 3);
        let notifier = spawn(&mut sched, 2);

        assert_eq!(run(&mut sched), waiter);
        sched.mutex_lock(m, Timeout::Forever).unwrap();
        assert_eq!(sched.condvar_wait(cv, m, Timeout::Forever), Ok(Wait::Blocked));
        assert_eq!(sched.mutex_info(m).unwrap().owner, None);

        assert_eq!(run(&mut sched), notifier);
        sched.notify_one(cv).unwrap();
        assert_eq!(sched.mutex_info(m).unwrap().owner, Some(waiter));
        assert_eq!(run(&mut sched), waiter);
        assert_eq!(sched.complete_wait(), Ok(()));
        sched.mutex_unlock(m).unwrap();
    }

    #[test]
    fn notify_queues_behind_current_owner() {
        let (mut sched, cv, m) = setup();
        let waiter = spawn(&mut sched, 5);
        let notifier = spawn(&mut sched, 2);

        assert_eq!(run(&mut sched), waiter);
        sched.mutex_lock(m, Timeout::Forever).unwrap();
        sched.condvar_wait(cv, m, Timeout::Forever).unwrap();
        assert_eq!(run(&mut sched), notifier);

        sched.mutex_lock(m, Timeout::Forever).unwrap();
        sched.notify_one(cv).unwrap();

        // Morphed onto the mutex: still blocked, owner inherits its priority.
        assert_eq!(sched.thread(waiter).unwrap().state(), ThreadState::Blocked);
        assert_eq!(sched.mutex_info(m).unwrap().waiters, 1);
        assert_eq!(
            sched.thread(notifier).unwrap().effective_priority(),
            Priority::new(5)
        );
        assert_eq!(sched.interrupt(waiter), Err(KernelError::InvalidState));

        sched.mutex_unlock(m).unwrap();
        assert_eq!(run(&mut sched), waiter);
        assert_eq!(sched.complete_wait(), Ok(()));
        assert_eq!(sched.mutex_info(m).unwrap().owner, Some(waiter));
    }

    #[test]
    fn timeout_reported_after_reacquire() {
        let (mut sched, cv, m) = setup();
        let waiter = spawn(&mut sched, 5);
        let holder = spawn(&mut sched, 2);

        assert_eq!(run(&mut sched), waiter);
        sched.mutex_lock(m, Timeout::Forever).unwrap();
        sched.condvar_wait(cv, m, Timeout::After(2)).unwrap();
        assert_eq!(run(&mut sched), holder);
        sched.mutex_lock(m, Timeout::Forever).unwrap();

        sched.tick();
        sched.tick();
        assert_eq!(sched.condvar_waiters(cv).unwrap().count(), 0);
        assert_eq!(sched.thread(waiter).unwrap().state(), ThreadState::Blocked);

        sched.mutex_unlock(m).unwrap();
        assert_eq!(run(&mut sched), waiter);
        assert_eq!(sched.complete_wait(), Err(KernelError::Timeout));
        assert_eq!(sched.mutex_info(m).unwrap().owner, Some(waiter));
    }

    #[test]
    fn notify_all_wakes_in_priority_order() {
        let (mut sched, cv, m) = setup();
        let a = spawn(&mut sched, 3);
        let b = spawn(&mut sched, 4);
        let notifier = spawn(&mut sched, 1);

        for expected in [b, a] {
            assert_eq!(run(&mut sched), expected);
            sched.mutex_lock(m, Timeout::Forever).unwrap();
            sched.condvar_wait(cv, m, Timeout::Forever).unwrap();
        }
        assert_eq!(run(&mut sched), notifier);
        assert_eq!(sched.destroy_condvar(cv), Err(KernelError::InvalidState));

        sched.notify_all(cv).unwrap();
        assert_eq!(sched.mutex_info(m).unwrap().owner, Some(b));
        let queued: Vec<ThreadId> = sched.mutex_waiters(m).unwrap().collect();
        assert_eq!(queued, [a]);
        assert_eq!(sched.destroy_condvar(cv), Ok(()));
    }
}
