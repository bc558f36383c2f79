// The MIT License (MIT)

// Copyright (c) 2015 Rustcc developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Single-threaded, stackful coroutines rendezvousing through synchronous
//! message queues.
//!
//! ```rust
//! use coroutine_mq::{spawn, yield_now};
//!
//! let co = spawn(|| {
//!     println!("before yield");
//!     yield_now();
//!     println!("resumed");
//! });
//!
//! coroutine_mq::resume(&co);
//! println!("back in root");
//! coroutine_mq::resume(&co);
//! ```
//!
//! The engine multiplexes any number of independently-stacked coroutines on
//! one OS thread; there is no preemption; a coroutine only ever gives up the
//! CPU at an explicit suspension point (`yield_now`, `join`, a blocking send
//! or receive, or by returning). See `SPEC_FULL.md` for the full component
//! design (stack allocator, context switch trampoline, scheduler, lifecycle,
//! message queue).

pub(crate) mod coro_queue;
pub mod coroutine;
pub mod error;
pub mod queue;
pub(crate) mod runtime;
pub(crate) mod stack;

mod builder;

#[cfg(test)]
mod tests;

pub use builder::Builder;
pub use coroutine::{Coroutine, Options, State};
pub use error::{ResumeError, ResumeResult};
pub use queue::{queue_create, queue_destroy, MessageQueue};

/// Spawns a new coroutine running `task`, switching into it immediately.
/// Equivalent to `Builder::new().spawn(task)`.
pub fn spawn<F>(task: F) -> Coroutine
where
    F: FnOnce() + 'static,
{
    Builder::new().spawn(task)
}

/// Returns the running coroutine, or `None` if called from the root control
/// flow (outside any coroutine).
pub fn current() -> Option<Coroutine> {
    runtime::current()
}

/// Returns `target`'s current lifecycle state. No side effects.
pub fn state(target: &Coroutine) -> State {
    runtime::state(target)
}

/// Round-robin handoff: moves the current coroutine to the tail of the ready
/// queue and switches to the new head (or root, if none).
pub fn yield_now() {
    runtime::yield_now();
}

/// Parks the caller until `target` completes or is destroyed. Must be called
/// from within a coroutine. Returns `Err` if `target`'s task panicked instead
/// of returning normally.
pub fn join(target: &Coroutine) -> ResumeResult<()> {
    runtime::join(target)
}

/// Detaches `target` from whatever queue it is in and marks it `Suspended`.
/// If `target` is the current coroutine, transfers away immediately.
pub fn suspend(target: &Coroutine) {
    runtime::suspend(target);
}

/// `suspend(current().unwrap())`; panics if called from root.
pub fn suspend_self() {
    runtime::suspend_self();
}

/// Detaches `target` from any queue and pushes it onto the ready queue as
/// `Running`. `target` must not be the current coroutine or already
/// `Completed`.
pub fn resume(target: &Coroutine) {
    runtime::resume(target);
}

/// Forcibly destroys `target`: suspends it, wakes every joiner (who will
/// observe it as `Completed`), then releases its stack and record.
pub fn destroy(target: &Coroutine) {
    runtime::destroy(target);
}

/// Associates an opaque value with `target`, for client bookkeeping.
pub fn data_set(target: &Coroutine, value: std::rc::Rc<dyn std::any::Any>) {
    target.data_set(value);
}

/// Retrieves the value previously associated with `target` via `data_set`.
pub fn data(target: &Coroutine) -> Option<std::rc::Rc<dyn std::any::Any>> {
    target.data()
}

/// `data_set` on the running coroutine. A no-op from root: the root control
/// flow has no coroutine-local storage to set (see SPEC_FULL.md §9's
/// decision on `self_data` from root).
pub fn self_data_set(value: std::rc::Rc<dyn std::any::Any>) {
    if let Some(me) = current() {
        me.data_set(value);
    }
}

/// `data` on the running coroutine; `None` from root.
pub fn self_data() -> Option<std::rc::Rc<dyn std::any::Any>> {
    current().and_then(|me| me.data())
}
