//! The coroutine record: identity, stack, saved context, state, and the
//! intrusive queue-membership fields described in the data model.
//!
//! Grounded on `coroutine_unique.rs`'s `Coroutine`/`Handle` split in the
//! teacher, adapted from a `Unique<Coroutine>` raw-pointer handle to an
//! `Rc`-based one: the record itself (`CoroutineInner`) lives behind a single
//! `Rc`, and `Coroutine` is a cheap-to-clone handle to it, which is what lets
//! the same coroutine appear simultaneously as "the current coroutine", "a
//! member of the ready queue", and "the target of someone else's `join`"
//! without any of those three holding a different kind of reference.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use context::stack::ProtectedFixedSizeStack;
use context::Context;

use crate::coro_queue::{CoroutineQueue, CoroutineQueueInner};
use crate::stack::DEFAULT_STACK_SIZE;

/// Spawn-time configuration, built directly or through a [`crate::Builder`].
#[derive(Clone)]
pub struct Options {
    pub stack_size: usize,
    pub name: Option<String>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            stack_size: DEFAULT_STACK_SIZE,
            name: None,
        }
    }
}

/// Lifecycle state, per the six-state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Completed,
    Suspended,
    Running,
    BlockedSend,
    BlockedRecv,
    BlockedJoin,
}

pub(crate) type Entry = Box<dyn FnOnce() + 'static>;

/// Callback stashed on a coroutine parked in `BlockedSend`: calling it clears
/// the `sender` back-reference on the pending message entry holding it, so a
/// `suspend` can detach the coroutine without disturbing the entry's payload.
pub(crate) type SenderCanceller = Rc<dyn Fn()>;

pub(crate) struct CoroutineInner {
    id: u64,
    name: Option<String>,
    is_root: bool,
    state: Cell<State>,
    stack: RefCell<Option<(usize, ProtectedFixedSizeStack)>>,
    context: RefCell<Option<Context>>,
    entry: RefCell<Option<Entry>>,
    join_queue: CoroutineQueue,
    user_data: RefCell<Option<Rc<dyn Any>>>,
    panic_payload: RefCell<Option<Box<dyn Any + Send + 'static>>>,
    sender_canceller: RefCell<Option<SenderCanceller>>,

    queue_prev: RefCell<Option<Coroutine>>,
    queue_next: RefCell<Option<Coroutine>>,
    queue_owner: RefCell<Option<Weak<RefCell<CoroutineQueueInner>>>>,
}

/// A handle to a coroutine record. Cloning is a refcount bump; all clones
/// refer to the same coroutine.
///
/// Deliberately `!Send`/`!Sync`: it wraps an `Rc`, so the type system rejects
/// any attempt to move a handle (or anything containing one) across threads,
/// matching the single-threaded scheduling model.
#[derive(Clone)]
pub struct Coroutine(pub(crate) Rc<CoroutineInner>);

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("state", &self.0.state.get())
            .finish()
    }
}

impl PartialEq for Coroutine {
    fn eq(&self, other: &Coroutine) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Coroutine {}

fn next_id() -> u64 {
    thread_local!(static NEXT: Cell<u64> = Cell::new(1));
    NEXT.with(|n| {
        let id = n.get();
        n.set(id + 1);
        id
    })
}

impl Coroutine {
    /// Constructs the root sentinel: no stack, no entry, never enqueued.
    pub(crate) fn new_root() -> Coroutine {
        Coroutine(Rc::new(CoroutineInner {
            id: 0,
            name: Some("root".to_string()),
            is_root: true,
            state: Cell::new(State::Running),
            stack: RefCell::new(None),
            context: RefCell::new(None),
            entry: RefCell::new(None),
            join_queue: CoroutineQueue::new(),
            user_data: RefCell::new(None),
            panic_payload: RefCell::new(None),
            sender_canceller: RefCell::new(None),
            queue_prev: RefCell::new(None),
            queue_next: RefCell::new(None),
            queue_owner: RefCell::new(None),
        }))
    }

    /// Allocates a coroutine record and its stack, with `entry` queued to run
    /// on first activation. Does not touch the scheduler or ready queue.
    pub(crate) fn spawn_record(
        opts: Options,
        stack: ProtectedFixedSizeStack,
        context: Context,
        entry: Entry,
    ) -> Coroutine {
        Coroutine(Rc::new(CoroutineInner {
            id: next_id(),
            name: opts.name,
            is_root: false,
            state: Cell::new(State::Suspended),
            stack: RefCell::new(Some((opts.stack_size, stack))),
            context: RefCell::new(Some(context)),
            entry: RefCell::new(Some(entry)),
            join_queue: CoroutineQueue::new(),
            user_data: RefCell::new(None),
            panic_payload: RefCell::new(None),
            sender_canceller: RefCell::new(None),
            queue_prev: RefCell::new(None),
            queue_next: RefCell::new(None),
            queue_owner: RefCell::new(None),
        }))
    }

    #[cfg(test)]
    pub(crate) fn new_detached(opts: Options) -> Coroutine {
        Coroutine(Rc::new(CoroutineInner {
            id: next_id(),
            name: opts.name,
            is_root: false,
            state: Cell::new(State::Suspended),
            stack: RefCell::new(None),
            context: RefCell::new(None),
            entry: RefCell::new(None),
            join_queue: CoroutineQueue::new(),
            user_data: RefCell::new(None),
            panic_payload: RefCell::new(None),
            sender_canceller: RefCell::new(None),
            queue_prev: RefCell::new(None),
            queue_next: RefCell::new(None),
            queue_owner: RefCell::new(None),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> Option<String> {
        self.0.name.clone()
    }

    /// A short label for log lines: the coroutine's name if it has one,
    /// else its numeric id.
    pub(crate) fn label(&self) -> String {
        match &self.0.name {
            Some(n) => n.clone(),
            None => format!("#{}", self.0.id),
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.is_root
    }

    pub fn state(&self) -> State {
        self.0.state.get()
    }

    pub(crate) fn set_state(&self, s: State) {
        self.0.state.set(s);
    }

    pub fn is_completed(&self) -> bool {
        self.state() == State::Completed
    }

    pub(crate) fn take_context(&self) -> Option<Context> {
        self.0.context.borrow_mut().take()
    }

    pub(crate) fn set_context(&self, ctx: Context) {
        *self.0.context.borrow_mut() = Some(ctx);
    }

    pub(crate) fn take_entry(&self) -> Entry {
        self.0
            .entry
            .borrow_mut()
            .take()
            .expect("coroutine entry already consumed")
    }

    pub(crate) fn take_stack(&self) -> Option<(usize, ProtectedFixedSizeStack)> {
        self.0.stack.borrow_mut().take()
    }

    pub(crate) fn join_queue(&self) -> &CoroutineQueue {
        &self.0.join_queue
    }

    pub fn data(&self) -> Option<Rc<dyn Any>> {
        self.0.user_data.borrow().clone()
    }

    pub fn data_set(&self, value: Rc<dyn Any>) {
        *self.0.user_data.borrow_mut() = Some(value);
    }

    pub(crate) fn set_panic_payload(&self, payload: Box<dyn Any + Send + 'static>) {
        *self.0.panic_payload.borrow_mut() = Some(payload);
    }

    pub(crate) fn take_panic_payload(&self) -> Option<Box<dyn Any + Send + 'static>> {
        self.0.panic_payload.borrow_mut().take()
    }

    pub(crate) fn set_sender_canceller(&self, f: Option<SenderCanceller>) {
        *self.0.sender_canceller.borrow_mut() = f;
    }

    /// Runs and clears the sender-cancellation callback, if any is set. A
    /// coroutine that isn't parked as a blocked sender has none.
    pub(crate) fn cancel_pending_send(&self) {
        if let Some(f) = self.0.sender_canceller.borrow_mut().take() {
            f();
        }
    }

    // --- intrusive queue-membership accessors, used only by `coro_queue` ---

    pub(crate) fn queue_prev(&self) -> Option<Coroutine> {
        self.0.queue_prev.borrow().clone()
    }
    pub(crate) fn set_queue_prev(&self, v: Option<Coroutine>) {
        *self.0.queue_prev.borrow_mut() = v;
    }
    pub(crate) fn queue_next(&self) -> Option<Coroutine> {
        self.0.queue_next.borrow().clone()
    }
    pub(crate) fn set_queue_next(&self, v: Option<Coroutine>) {
        *self.0.queue_next.borrow_mut() = v;
    }
    pub(crate) fn queue_owner(&self) -> Option<Weak<RefCell<CoroutineQueueInner>>> {
        self.0.queue_owner.borrow().clone()
    }
    pub(crate) fn set_queue_owner(&self, v: Option<Weak<RefCell<CoroutineQueueInner>>>) {
        *self.0.queue_owner.borrow_mut() = v;
    }

    /// True iff this coroutine is presently linked into some `CoroutineQueue`
    /// (ready, a join queue, or a receiver wait queue). Used by the "queue
    /// membership" testable property.
    pub fn is_queued(&self) -> bool {
        self.queue_owner().is_some()
    }
}
