//! Priority-ordered wait queue shared by every blocking object.

use kestrel_core::Priority;

use crate::list::{LinkKind, List};
use crate::thread::{ThreadId, ThreadTable};

/// Threads blocked on one object, ordered by effective priority and, within
/// a priority, by arrival.
#[derive(Debug)]
pub(crate) struct WaitQueue {
    list: List,
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitQueue {
    pub(crate) const fn new() -> Self {
        Self {
            list: List::new(LinkKind::Queue),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.list.len()
    }

    /// Inserts `id` behind every waiter of equal or higher priority.
    pub(crate) fn enqueue<const N: usize>(&mut self, threads: &mut ThreadTable<N>, id: ThreadId) {
        let priority = threads.tcb(id).effective_priority;
        let before = self
            .list
            .iter(threads)
            .find(|&other| threads.tcb(other).effective_priority < priority);
        self.list.insert_before(threads, id, before);
    }

    /// Removes and returns the most urgent waiter.
    pub(crate) fn pop_highest<const N: usize>(&mut self, threads: &mut ThreadTable<N>) -> Option<ThreadId> {
        self.list.pop_front(threads)
    }

    pub(crate) fn remove<const N: usize>(&mut self, threads: &mut ThreadTable<N>, id: ThreadId) -> bool {
        self.list.remove(threads, id)
    }

    /// Re-sorts `id` after its effective priority changed. The thread lands
    /// behind existing waiters of its new priority.
    pub(crate) fn reposition<const N: usize>(&mut self, threads: &mut ThreadTable<N>, id: ThreadId) {
        if self.list.remove(threads, id) {
            self.enqueue(threads, id);
        }
    }

    pub(crate) fn highest_priority<const N: usize>(&self, threads: &ThreadTable<N>) -> Option<Priority> {
        self.list
            .head()
            .map(|id| threads.tcb(id).effective_priority)
    }

    pub(crate) fn iter<'a, const N: usize>(
        &self,
        threads: &'a ThreadTable<N>,
    ) -> impl Iterator<Item = ThreadId> + 'a {
        self.list.iter(threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{ThreadConfig, ThreadEntry};

    fn spawn<const N: usize>(threads: &mut ThreadTable<N>, priority: u8) -> ThreadId {
        let config = ThreadConfig::new("waiter", Priority::new(priority), ThreadEntry::idle());
        threads.allocate(&config, 1).unwrap()
    }

    #[test]
    fn ordered_by_priority_then_arrival() {
        let mut threads: ThreadTable<8> = ThreadTable::new();
        let mut queue = WaitQueue::new();

        let low = spawn(&mut threads, 1);
        let high_a = spawn(&mut threads, 5);
        let mid = spawn(&mut threads, 3);
        let high_b = spawn(&mut threads, 5);

        for id in [low, high_a, mid, high_b] {
            queue.enqueue(&mut threads, id);
        }

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.highest_priority(&threads), Some(Priority::new(5)));
        let order: Vec<ThreadId> = queue.iter(&threads).collect();
        assert_eq!(order, [high_a, high_b, mid, low]);

        assert_eq!(queue.pop_highest(&mut threads), Some(high_a));
        assert_eq!(queue.pop_highest(&mut threads), Some(high_b));
    }

    #[test]
    fn reposition_after_boost() {
        let mut threads: ThreadTable<4> = ThreadTable::new();
        let mut queue = WaitQueue::new();

        let first = spawn(&mut threads, 4);
        let second = spawn(&mut threads, 2);
        queue.enqueue(&mut threads, first);
        queue.enqueue(&mut threads, second);

        threads.tcb_mut(second).effective_priority = Priority::new(6);
        queue.reposition(&mut threads, second);

        assert_eq!(queue.pop_highest(&mut threads), Some(second));
        assert_eq!(queue.pop_highest(&mut threads), Some(first));
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_unqueued_thread_is_noop() {
        let mut threads: ThreadTable<2> = ThreadTable::new();
        let mut queue = WaitQueue::new();
        let id = spawn(&mut threads, 1);

        assert!(!queue.remove(&mut threads, id));
        queue.reposition(&mut threads, id);
        assert!(queue.is_empty());
    }
}
