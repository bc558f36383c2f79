//! Fixed-size coroutine stacks, recycled through a free-list.
//!
//! Grounded on `stack/stack_pool.rs` in the teacher: a LIFO free-list keyed by
//! stack size, capped by an env-var-controlled watermark so a burst of
//! short-lived coroutines doesn't pin down memory forever. The actual stack
//! region (mmap + guard page) is no longer hand-rolled; it comes from
//! `context::stack::ProtectedFixedSizeStack`, which provides the same guard
//! page the teacher built with `mprotect`/`VirtualProtect`.

use std::sync::OnceLock;

use context::stack::ProtectedFixedSizeStack;
use log::{debug, trace};

/// Default stack size handed to `Options::default()`: a small multiple of the
/// page size, per the allocator's sizing note.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

fn max_cached_stacks() -> usize {
    static CAP: OnceLock<usize> = OnceLock::new();
    *CAP.get_or_init(|| {
        std::env::var("RUST_COROUTINE_MAX_CACHED_STACKS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10)
    })
}

/// A free-list of stacks of one particular size.
///
/// The pool is owned by the process-wide runtime; it is not `Send`/`Sync`
/// and is never meant to be shared across threads.
pub struct StackPool {
    // Kept sorted by size is unnecessary: coroutines overwhelmingly reuse the
    // same `Options::stack_size`, so a flat list with a linear scan is both
    // simpler and, in practice, as fast as a size-bucketed map. The size is
    // tracked alongside the stack rather than queried back from it.
    free: Vec<(usize, ProtectedFixedSizeStack)>,
}

impl StackPool {
    pub fn new() -> StackPool {
        StackPool { free: Vec::new() }
    }

    /// Pop a stack of at least `min_size` bytes from the free-list, or
    /// allocate a fresh one if none fits.
    pub fn take_stack(&mut self, min_size: usize) -> ProtectedFixedSizeStack {
        if let Some(idx) = self.free.iter().position(|(size, _)| *size >= min_size) {
            trace!("stack pool: reusing cached stack ({} cached)", self.free.len() - 1);
            return self.free.swap_remove(idx).1;
        }
        debug!("stack pool: allocating fresh {}-byte stack", min_size);
        ProtectedFixedSizeStack::new(min_size).expect("failed to allocate coroutine stack")
    }

    /// Return `stack` to the free-list, unless the cap is already reached, in
    /// which case it is dropped and its pages returned to the system.
    pub fn give_stack(&mut self, size: usize, stack: ProtectedFixedSizeStack) {
        if self.free.len() < max_cached_stacks() {
            trace!("stack pool: caching stack ({} now cached)", self.free.len() + 1);
            self.free.push((size, stack));
        } else {
            trace!("stack pool: cap reached, releasing stack to the system allocator");
        }
    }

    /// Number of stacks currently cached. Exposed for the "no stack leak"
    /// testable property.
    #[cfg(test)]
    pub fn cached_len(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_pool_reuses_same_size() {
        let mut pool = StackPool::new();
        let s = pool.take_stack(DEFAULT_STACK_SIZE);
        pool.give_stack(DEFAULT_STACK_SIZE, s);
        assert_eq!(pool.cached_len(), 1);
        let _s2 = pool.take_stack(DEFAULT_STACK_SIZE);
        assert_eq!(pool.cached_len(), 0);
    }

    #[test]
    fn stack_pool_caches_up_to_default_cap() {
        let mut pool = StackPool::new();
        for _ in 0..20 {
            let s = pool.take_stack(DEFAULT_STACK_SIZE);
            pool.give_stack(DEFAULT_STACK_SIZE, s);
        }
        assert!(pool.cached_len() <= 10.max(max_cached_stacks()));
    }
}
