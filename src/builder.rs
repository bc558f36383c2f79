//! Coroutine configuration, built up the same chained way the teacher's
//! `Builder` does: `Builder::new().name(..).stack_size(..).spawn(..)`.

use crate::coroutine::{Coroutine, Options};
use crate::runtime;

/// Coroutine configuration. Provides detailed control over the stack size
/// and diagnostic name of a coroutine-to-be.
///
/// ```ignore
/// let co = Builder::new()
///     .name(format!("worker-{}", 1))
///     .stack_size(64 * 1024)
///     .spawn(|| println!("hello from a coroutine"));
/// ```
pub struct Builder {
    opts: Options,
}

impl Builder {
    /// Generates the base configuration for spawning a coroutine, from which
    /// configuration methods can be chained.
    pub fn new() -> Builder {
        Builder {
            opts: Options::default(),
        }
    }

    /// Names the coroutine-to-be. Used only for identification: log lines
    /// and panic messages.
    pub fn name(mut self, name: String) -> Builder {
        self.opts.name = Some(name);
        self
    }

    /// Sets the size of the stack for the new coroutine.
    pub fn stack_size(mut self, size: usize) -> Builder {
        self.opts.stack_size = size;
        self
    }

    /// Spawns a new coroutine running `task`, switching into it immediately,
    /// and returns its handle.
    pub fn spawn<F>(self, task: F) -> Coroutine
    where
        F: FnOnce() + 'static,
    {
        runtime::spawn(self.opts, task)
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_name_and_stack_size() {
        let co = Builder::new()
            .name("named".to_string())
            .stack_size(32 * 1024)
            .spawn(|| {});
        assert_eq!(co.name(), Some("named".to_string()));
        assert!(co.is_completed());
    }
}
