//! Intrusive doubly-linked queue of coroutines.
//!
//! Used for three distinct purposes that all share the same shape: the
//! process-wide ready queue, each coroutine's join queue, and each message
//! queue's receiver wait queue. A coroutine is a member of at most one such
//! queue at a time (the base invariant this module exists to enforce), which
//! is what lets `suspend` unlink a coroutine in O(1) without knowing in
//! advance which queue it is parked in.
//!
//! The source represents this with raw next/prev pointers embedded in the
//! coroutine record and a back-pointer to the owning queue. The port keeps
//! the same shape but swaps raw pointers for `Coroutine` handles (`Rc`-backed,
//! so cloning is a refcount bump) and the queue back-pointer for a `Weak`
//! reference, so an unlink never has to search.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::coroutine::Coroutine;

pub(crate) struct CoroutineQueueInner {
    pub(crate) head: Option<Coroutine>,
    pub(crate) tail: Option<Coroutine>,
    pub(crate) len: usize,
}

/// A FIFO of coroutines, implemented as an intrusive doubly-linked list.
#[derive(Clone)]
pub(crate) struct CoroutineQueue(pub(crate) Rc<RefCell<CoroutineQueueInner>>);

impl CoroutineQueue {
    pub(crate) fn new() -> CoroutineQueue {
        CoroutineQueue(Rc::new(RefCell::new(CoroutineQueueInner {
            head: None,
            tail: None,
            len: 0,
        })))
    }

    pub(crate) fn len(&self) -> usize {
        self.0.borrow().len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn downgrade(&self) -> Weak<RefCell<CoroutineQueueInner>> {
        Rc::downgrade(&self.0)
    }

    /// Appends `co` to the tail. `co` must not already be a member of any
    /// queue (enforced by the caller; checked here in debug builds).
    pub(crate) fn push_back(&self, co: &Coroutine) {
        debug_assert!(
            co.queue_owner().is_none(),
            "coroutine is already a member of a queue"
        );
        co.set_queue_owner(Some(self.downgrade()));
        let mut inner = self.0.borrow_mut();
        match inner.tail.clone() {
            Some(old_tail) => {
                old_tail.set_queue_next(Some(co.clone()));
                co.set_queue_prev(Some(old_tail));
                inner.tail = Some(co.clone());
            }
            None => {
                inner.head = Some(co.clone());
                inner.tail = Some(co.clone());
            }
        }
        inner.len += 1;
    }

    /// Removes and returns the head of the queue, if any.
    pub(crate) fn pop_front(&self) -> Option<Coroutine> {
        let next = {
            let inner = self.0.borrow();
            let head = inner.head.clone()?;
            head.queue_next()
        };
        let head;
        {
            let mut inner = self.0.borrow_mut();
            head = inner.head.take().expect("checked non-empty above");
            match next.clone() {
                Some(n) => {
                    n.set_queue_prev(None);
                    inner.head = Some(n);
                }
                None => {
                    inner.tail = None;
                }
            }
            inner.len -= 1;
        }
        head.set_queue_prev(None);
        head.set_queue_next(None);
        head.set_queue_owner(None);
        Some(head)
    }
}

impl Coroutine {
    /// Detaches this coroutine from whatever `CoroutineQueue` it currently
    /// belongs to, if any. O(1): the coroutine carries its own prev/next
    /// links and a back-reference to the owning queue, so no traversal is
    /// needed to find it.
    pub(crate) fn unlink_from_queue(&self) {
        let owner = match self.queue_owner() {
            Some(weak) => match weak.upgrade() {
                Some(rc) => rc,
                None => {
                    // Queue was already dropped (e.g. `queue_destroy`); just
                    // clear the stale link fields.
                    self.set_queue_prev(None);
                    self.set_queue_next(None);
                    self.set_queue_owner(None);
                    return;
                }
            },
            None => return,
        };
        let prev = self.queue_prev();
        let next = self.queue_next();
        {
            let mut inner = owner.borrow_mut();
            match &prev {
                Some(p) => p.set_queue_next(next.clone()),
                None => inner.head = next.clone(),
            }
            match &next {
                Some(n) => n.set_queue_prev(prev.clone()),
                None => inner.tail = prev.clone(),
            }
            inner.len -= 1;
        }
        self.set_queue_prev(None);
        self.set_queue_next(None);
        self.set_queue_owner(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::{Coroutine, Options};

    fn leaf(name: &str) -> Coroutine {
        Coroutine::new_detached(Options { name: Some(name.to_string()), ..Default::default() })
    }

    #[test]
    fn fifo_order() {
        let q = CoroutineQueue::new();
        let a = leaf("a");
        let b = leaf("b");
        let c = leaf("c");
        q.push_back(&a);
        q.push_back(&b);
        q.push_back(&c);
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop_front().unwrap().id(), a.id());
        assert_eq!(q.pop_front().unwrap().id(), b.id());
        assert_eq!(q.pop_front().unwrap().id(), c.id());
        assert!(q.is_empty());
    }

    #[test]
    fn unlink_from_middle() {
        let q = CoroutineQueue::new();
        let a = leaf("a");
        let b = leaf("b");
        let c = leaf("c");
        q.push_back(&a);
        q.push_back(&b);
        q.push_back(&c);
        b.unlink_from_queue();
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_front().unwrap().id(), a.id());
        assert_eq!(q.pop_front().unwrap().id(), c.id());
    }

    #[test]
    fn unlink_not_a_member_is_a_no_op() {
        let a = leaf("a");
        a.unlink_from_queue();
        assert!(a.queue_owner().is_none());
    }
}
