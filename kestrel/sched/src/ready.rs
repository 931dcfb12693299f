//! Ready queue set.
//!
//! One FIFO list per priority level plus a 64-bit bitmap with a bit set for
//! every non-empty level, so the highest ready level is found with a single
//! `leading_zeros`.

use kestrel_core::fatal::{self, FatalError};
use kestrel_core::Priority;

use crate::list::{LinkKind, LinkStore, List};
use crate::thread::ThreadId;

#[derive(Debug)]
pub(crate) struct ReadyQueueSet<const LEVELS: usize> {
    levels: [List; LEVELS],
    mask: u64,
}

impl<const LEVELS: usize> ReadyQueueSet<LEVELS> {
    pub(crate) fn new() -> Self {
        Self {
            levels: core::array::from_fn(|_| List::new(LinkKind::Queue)),
            mask: 0,
        }
    }

    /// Appends `id` behind the threads already ready at `priority`.
    pub(crate) fn push_back<S: LinkStore>(&mut self, store: &mut S, id: ThreadId, priority: Priority) {
        let level = priority.level();
        self.levels[level].push_back(store, id);
        self.mask |= 1u64 << level;
    }

    /// Puts `id` in front of the threads already ready at `priority`.
    pub(crate) fn push_front<S: LinkStore>(&mut self, store: &mut S, id: ThreadId, priority: Priority) {
        let level = priority.level();
        self.levels[level].push_front(store, id);
        self.mask |= 1u64 << level;
    }

    /// Unlinks `id` from the level of `priority`, which must be the
    /// priority it was queued with.
    pub(crate) fn remove<S: LinkStore>(&mut self, store: &mut S, id: ThreadId, priority: Priority) -> bool {
        let level = priority.level();
        let removed = self.levels[level].remove(store, id);
        if self.levels[level].is_empty() {
            self.mask &= !(1u64 << level);
        }
        removed
    }

    pub(crate) fn highest_priority(&self) -> Option<Priority> {
        if self.mask == 0 {
            None
        } else {
            Some(Priority::new(63 - self.mask.leading_zeros() as u8))
        }
    }

    /// Head of the highest non-empty level.
    pub(crate) fn peek_highest(&self) -> Option<ThreadId> {
        let level = self.highest_priority()?.level();
        match self.levels[level].head() {
            Some(id) => Some(id),
            None => fatal::raise(FatalError::ReadyBitmapMismatch { level: level as u8 }),
        }
    }

    #[cfg(test)]
    pub(crate) fn len_at(&self, priority: Priority) -> usize {
        self.levels[priority.level()].len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.mask == 0
    }

    /// Threads ready at `priority` in the order they will run.
    pub(crate) fn iter_level<'a, S: LinkStore>(
        &self,
        store: &'a S,
        priority: Priority,
    ) -> impl Iterator<Item = ThreadId> + 'a {
        self.levels[priority.level()].iter(store)
    }
}
