//! Intrusive doubly linked thread lists.
//!
//! Every TCB carries exactly one queue link and one timer link, so a thread
//! can sit in at most one ready/wait queue and at most one timeout list at a
//! time. Inserting a thread whose link is already in use is a fatal
//! invariant violation.

use kestrel_core::fatal::{self, FatalError};

use crate::thread::ThreadId;

/// Which of the two per-thread links a list threads through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkKind {
    /// Ready queue or wait queue membership
    Queue,
    /// Timeout list membership
    Timer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Link {
    prev: Option<ThreadId>,
    next: Option<ThreadId>,
    linked: bool,
}

impl Link {
    #[cfg(test)]
    pub(crate) fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Storage that owns the links of the threads a [`List`] refers to.
pub(crate) trait LinkStore {
    fn link(&self, id: ThreadId, kind: LinkKind) -> &Link;
    fn link_mut(&mut self, id: ThreadId, kind: LinkKind) -> &mut Link;
}

#[derive(Debug)]
pub(crate) struct List {
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
    len: usize,
    kind: LinkKind,
}

impl List {
    pub(crate) const fn new(kind: LinkKind) -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            kind,
        }
    }

    pub(crate) fn head(&self) -> Option<ThreadId> {
        self.head
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn push_back<S: LinkStore>(&mut self, store: &mut S, id: ThreadId) {
        self.insert_before(store, id, None);
    }

    pub(crate) fn push_front<S: LinkStore>(&mut self, store: &mut S, id: ThreadId) {
        let head = self.head;
        self.insert_before(store, id, head);
    }

    /// Links `id` in front of `before`, or at the tail when `before` is `None`.
    pub(crate) fn insert_before<S: LinkStore>(
        &mut self,
        store: &mut S,
        id: ThreadId,
        before: Option<ThreadId>,
    ) {
        if store.link(id, self.kind).linked {
            fatal::raise(FatalError::DoubleEnqueue { thread: id.index() });
        }

        let prev = match before {
            Some(next) => store.link(next, self.kind).prev,
            None => self.tail,
        };

        *store.link_mut(id, self.kind) = Link {
            prev,
            next: before,
            linked: true,
        };

        match prev {
            Some(prev) => store.link_mut(prev, self.kind).next = Some(id),
            None => self.head = Some(id),
        }
        match before {
            Some(next) => store.link_mut(next, self.kind).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.len += 1;
    }

    /// Unlinks `id`. Returns false when the thread was not linked.
    pub(crate) fn remove<S: LinkStore>(&mut self, store: &mut S, id: ThreadId) -> bool {
        let link = *store.link(id, self.kind);
        if !link.linked {
            return false;
        }

        match link.prev {
            Some(prev) => store.link_mut(prev, self.kind).next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => store.link_mut(next, self.kind).prev = link.prev,
            None => self.tail = link.prev,
        }

        *store.link_mut(id, self.kind) = Link::default();
        self.len -= 1;
        true
    }

    pub(crate) fn pop_front<S: LinkStore>(&mut self, store: &mut S) -> Option<ThreadId> {
        let head = self.head?;
        self.remove(store, head);
        Some(head)
    }

    pub(crate) fn iter<'a, S: LinkStore>(&self, store: &'a S) -> ListIter<'a, S> {
        ListIter {
            store,
            cursor: self.head,
            kind: self.kind,
        }
    }
}

pub(crate) struct ListIter<'a, S: LinkStore> {
    store: &'a S,
    cursor: Option<ThreadId>,
    kind: LinkKind,
}

impl<S: LinkStore> Iterator for ListIter<'_, S> {
    type Item = ThreadId;

    fn next(&mut self) -> Option<ThreadId> {
        let current = self.cursor?;
        self.cursor = self.store.link(current, self.kind).next;
        Some(current)
    }
}
