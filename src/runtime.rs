//! Process-wide runtime: the scheduler's ready queue, the identity of the
//! currently running coroutine, the root context, the deferred-exit slot,
//! and the stack free-list.
//!
//! The source keeps these as bare global statics (`Environment`, accessed
//! through a thread-local singleton in the teacher). The port keeps the same
//! "one runtime per OS thread" shape (a `thread_local!`) but collects the
//! fields into one `Runtime` value instead of scattering them, per the
//! design note on encapsulating global mutable state — this also makes the
//! whole thing a single point to reset between tests.

use std::cell::{Cell, RefCell};

use context::{Context, Transfer};
use log::{debug, error, trace, warn};

use crate::coro_queue::CoroutineQueue;
use crate::coroutine::{Coroutine, Entry, Options, State};
use crate::error::ResumeError;
use crate::stack::StackPool;

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

pub(crate) struct Runtime {
    root: Coroutine,
    current: RefCell<Coroutine>,
    ready: CoroutineQueue,
    /// Set immediately before every `Context::resume`, naming the coroutine
    /// whose call site this resume sits in; consumed by whichever coroutine
    /// (or trampoline) next regains control. `None` only covers the terminal
    /// transfer out of a finishing coroutine, which has no continuation to
    /// save.
    pending_origin: RefCell<Option<Coroutine>>,
    /// The most recently finished coroutine, whose stack has not yet been
    /// freed (deferred because a coroutine cannot free its own stack while
    /// still executing on it).
    exited: RefCell<Option<Coroutine>>,
    stacks: RefCell<StackPool>,
    depth: Cell<u64>,
}

impl Runtime {
    fn new() -> Runtime {
        let root = Coroutine::new_root();
        Runtime {
            current: RefCell::new(root.clone()),
            root,
            ready: CoroutineQueue::new(),
            pending_origin: RefCell::new(None),
            exited: RefCell::new(None),
            stacks: RefCell::new(StackPool::new()),
            depth: Cell::new(0),
        }
    }

    pub(crate) fn with<R>(f: impl FnOnce(&Runtime) -> R) -> R {
        RUNTIME.with(f)
    }

    pub(crate) fn current(&self) -> Coroutine {
        self.current.borrow().clone()
    }

    fn set_current(&self, co: Coroutine) {
        *self.current.borrow_mut() = co;
    }

    pub(crate) fn root(&self) -> Coroutine {
        self.root.clone()
    }

    pub(crate) fn ready_queue(&self) -> &CoroutineQueue {
        &self.ready
    }

    pub(crate) fn take_stack(&self, size: usize) -> context::stack::ProtectedFixedSizeStack {
        self.stacks.borrow_mut().take_stack(size)
    }

    /// Number of stacks currently cached in the free-list. Exposed for the
    /// "no stack leak" testable property (SPEC_FULL.md §8, invariant 5).
    #[cfg(test)]
    pub(crate) fn cached_stacks(&self) -> usize {
        self.stacks.borrow().cached_len()
    }

    /// Drains the single-slot exited-coroutine record, if set, releasing its
    /// stack back to the free-list. Called by every switch on the way back
    /// in, per the deferred-reclamation design.
    fn reclaim_exited(&self) {
        let exited = self.exited.borrow_mut().take();
        if let Some(co) = exited {
            if let Some((size, stack)) = co.take_stack() {
                trace!("reclaiming stack of exited coroutine {}", co.label());
                self.stacks.borrow_mut().give_stack(size, stack);
            }
        }
    }

    fn publish_exited(&self, co: Coroutine) {
        let previous = self.exited.replace(Some(co));
        debug_assert!(
            previous.is_none(),
            "exited_coroutine slot overwritten before being drained"
        );
    }
}

/// The single context-switch primitive every other operation is built on.
///
/// Records `origin` as the coroutine whose call site this switch represents,
/// switches to `to`, and returns once something switches back into `origin`.
pub(crate) fn switch_to(rt: &Runtime, origin: &Coroutine, to: &Coroutine) {
    trace!("switch: {} -> {}", origin.label(), to.label());
    *rt.pending_origin.borrow_mut() = Some(origin.clone());
    let ctx = to
        .take_context()
        .unwrap_or_else(|| panic!("coroutine {} has no context to resume", to.label()));
    let transfer = unsafe { ctx.resume(0) };
    complete_switch(rt, transfer);
}

/// Runs on the receiving end of every transfer: at a coroutine's first
/// activation (from the trampoline) and at every subsequent resume-point.
pub(crate) fn complete_switch(rt: &Runtime, t: Transfer) {
    if let Some(resumer) = rt.pending_origin.borrow_mut().take() {
        resumer.set_context(t.context);
    }
    // else: `t.context` belongs to a coroutine that just finished and will
    // never be resumed again; dropping it here only discards the saved
    // register blob, not the stack (the stack is reclaimed separately).
    rt.reclaim_exited();
}

/// The first-call trampoline: installed as every new coroutine's entry
/// point. Runs exactly once per coroutine, then the coroutine always
/// resumes through `switch_to` instead.
pub(crate) extern "C" fn trampoline(t: Transfer) -> ! {
    Runtime::with(|rt| complete_switch(rt, t));
    let me = Runtime::with(|rt| rt.current());
    debug!("coroutine {} entering task", me.label());
    let entry: Entry = me.take_entry();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(entry));
    Runtime::with(|rt| finish_current(rt, &me, result))
}

fn finish_current(rt: &Runtime, me: &Coroutine, result: std::thread::Result<()>) -> ! {
    match result {
        Ok(()) => {
            debug!("coroutine {} completed", me.label());
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<non-string panic payload>".to_string());
            error!("coroutine {} panicked: {}", me.label(), message);
            me.set_panic_payload(payload);
        }
    }
    me.set_state(State::Completed);

    // Drain the join queue: every joiner becomes runnable again, each
    // observing `me`'s now-Completed state once it's scheduled.
    let join_queue = me.join_queue();
    while let Some(joiner) = join_queue.pop_front() {
        trace!("waking joiner {} of {}", joiner.label(), me.label());
        joiner.set_state(State::Running);
        rt.ready_queue().push_back(&joiner);
    }

    rt.publish_exited(me.clone());

    let next = rt.ready_queue().pop_front();
    *rt.pending_origin.borrow_mut() = None;
    match next {
        Some(n) => {
            n.set_state(State::Running);
            rt.set_current(n.clone());
            let ctx = n
                .take_context()
                .unwrap_or_else(|| panic!("coroutine {} has no context to resume", n.label()));
            let _ = unsafe { ctx.resume(0) };
        }
        None => {
            rt.set_current(rt.root());
            let ctx = rt
                .root()
                .take_context()
                .expect("root has no saved context to return to");
            let _ = unsafe { ctx.resume(0) };
        }
    }
    unreachable!("a finished coroutine's stack must never be reentered")
}

/// Moves the running coroutine to the tail of the ready queue, then switches
/// to the new head (or root, if the ready queue is empty).
pub(crate) fn yield_current(rt: &Runtime) {
    let me = rt.current();
    if me.is_root() {
        // Yielding from root just hands off to the head of the ready queue
        // and returns once that coroutine (or whatever eventually) hands
        // control back to root.
        if let Some(next) = rt.ready_queue().pop_front() {
            next.set_state(State::Running);
            rt.set_current(next.clone());
            switch_to(rt, &rt.root(), &next);
            rt.set_current(rt.root());
        }
        return;
    }
    me.set_state(State::Running);
    rt.ready_queue().push_back(&me);
    let next = rt.ready_queue().pop_front().filter(|n| n != &me);
    match next {
        Some(n) => {
            n.set_state(State::Running);
            rt.set_current(n.clone());
            switch_to(rt, &me, &n);
        }
        None => {
            // `me` was the only entry; it was pushed then immediately
            // popped back out by the filter, so nobody else is runnable.
            // Hand control back to root rather than spin in place.
            me.unlink_from_queue();
            rt.set_current(rt.root());
            switch_to(rt, &me, &rt.root());
        }
    }
    rt.set_current(me);
}

/// General-purpose parking primitive used by `join`/`send`/`recv` and their
/// relatives: parks the current coroutine into `target_queue` (if any) with
/// `target_state`, then resumes `specific_next` if given, else the ready
/// queue head, else root.
pub(crate) fn transfer_out(
    rt: &Runtime,
    target_queue: Option<&CoroutineQueue>,
    target_state: State,
    specific_next: Option<Coroutine>,
) {
    let me = rt.current();
    debug_assert!(!me.is_root(), "only a coroutine may block or yield");
    me.set_state(target_state);
    if let Some(q) = target_queue {
        q.push_back(&me);
    }
    let next = specific_next.or_else(|| rt.ready_queue().pop_front());
    match next {
        Some(n) => {
            n.set_state(State::Running);
            rt.set_current(n.clone());
            switch_to(rt, &me, &n);
        }
        None => {
            rt.set_current(rt.root());
            switch_to(rt, &me, &rt.root());
        }
    }
    rt.set_current(me);
}

/// `return_to_root`: only used by the exit path today via `finish_current`,
/// kept as a named operation for symmetry with the scheduler's three
/// conceptual operations.
#[allow(dead_code)]
pub(crate) fn return_to_root(rt: &Runtime) {
    let me = rt.current();
    rt.set_current(rt.root());
    switch_to(rt, &me, &rt.root());
}

/// Spawns a new coroutine running `task`, switching into it immediately.
/// Control returns here once the child yields, blocks, or completes.
pub fn spawn<F>(opts: Options, task: F) -> Coroutine
where
    F: FnOnce() + 'static,
{
    Runtime::with(|rt| {
        let stack_size = opts.stack_size;
        let stack = rt.take_stack(stack_size);
        let context = unsafe { Context::new(&stack, crate::runtime::trampoline) };
        let child = Coroutine::spawn_record(opts, stack, context, Box::new(task));
        debug!("spawned coroutine {}", child.label());

        let parent = rt.current();
        if !parent.is_root() {
            parent.set_state(State::Running);
            rt.ready_queue().push_back(&parent);
        }
        child.set_state(State::Running);
        rt.set_current(child.clone());
        switch_to(rt, &parent, &child);
        rt.set_current(parent);
        child
    })
}

/// Root-only test helper: `join` requires coroutine context (see `join`
/// below), so tests driving a scenario from the top-level `#[test]` fn
/// (itself running on the root context) pump the scheduler with `yield_now`
/// until the target reaches `Completed`, rather than blocking on it.
#[cfg(test)]
pub(crate) fn run_until_completed(target: &Coroutine) {
    while !target.is_completed() {
        yield_now();
    }
}

/// `self()`: the running coroutine, or `None` if called from root.
pub fn current() -> Option<Coroutine> {
    Runtime::with(|rt| {
        let cur = rt.current();
        if cur.is_root() {
            None
        } else {
            Some(cur)
        }
    })
}

pub fn state(target: &Coroutine) -> State {
    target.state()
}

/// Forcibly detaches `target` from whatever queue it is in, marks it
/// `Suspended`, and — if it is the current coroutine — transfers away
/// immediately.
pub fn suspend(target: &Coroutine) {
    Runtime::with(|rt| {
        target.cancel_pending_send();
        target.unlink_from_queue();
        let was_current = *rt.current.borrow() == *target;
        target.set_state(State::Suspended);
        if was_current {
            debug!("{} suspending itself", target.label());
            transfer_out(rt, None, State::Suspended, None);
        } else {
            trace!("{} suspended from outside", target.label());
        }
    });
}

pub fn suspend_self() {
    if let Some(me) = current() {
        suspend(&me);
    } else {
        panic!("suspend_self called with no current coroutine");
    }
}

/// Detaches `target` from any queue and pushes it onto the ready queue as
/// `Running`. Precondition: `target` is not the current coroutine and is not
/// `Completed`.
pub fn resume(target: &Coroutine) {
    Runtime::with(|rt| {
        assert!(
            *rt.current.borrow() != *target,
            "cannot resume the current coroutine"
        );
        assert!(
            target.state() != State::Completed,
            "cannot resume a completed coroutine"
        );
        if target.state() == State::Suspended && !target.is_queued() {
            warn!("resuming {} which is Suspended with no queue membership", target.label());
        }
        target.cancel_pending_send();
        target.unlink_from_queue();
        target.set_state(State::Running);
        rt.ready_queue().push_back(target);
        trace!("{} resumed, pushed to ready queue", target.label());
    });
}

/// Round-robin handoff: `transfer(ready, Running, null)`.
pub fn yield_now() {
    Runtime::with(yield_current);
}

/// Parks the caller on `target`'s join queue until `target` completes or is
/// destroyed, then reports whether it finished normally or panicked.
pub fn join(target: &Coroutine) -> Result<(), ResumeError> {
    Runtime::with(|rt| {
        assert!(!rt.current().is_root(), "join must be called from within a coroutine");
        if !target.is_completed() {
            transfer_out(rt, Some(target.join_queue()), State::BlockedJoin, None);
        }
    });
    match target.take_panic_payload() {
        Some(payload) => Err(ResumeError::new(payload)),
        None => Ok(()),
    }
}

/// Suspends `target`, resumes every joiner (who will observe it as
/// `Completed`), then releases its stack and record.
pub fn destroy(target: &Coroutine) {
    Runtime::with(|rt| {
        target.cancel_pending_send();
        target.unlink_from_queue();
        target.set_state(State::Completed);

        let join_queue = target.join_queue();
        while let Some(joiner) = join_queue.pop_front() {
            joiner.set_state(State::Running);
            rt.ready_queue().push_back(&joiner);
        }

        if let Some((size, stack)) = target.take_stack() {
            debug!("destroying coroutine {}, releasing its stack", target.label());
            rt.stacks.borrow_mut().give_stack(size, stack);
        } else {
            warn!("destroy called on {} with no owned stack (already released?)", target.label());
        }
    });
}
