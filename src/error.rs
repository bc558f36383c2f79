//! Error types surfaced across coroutine boundaries.

use std::any::Any;
use std::fmt;

/// Returned by `resume`/`join` when the target coroutine's task panicked
/// instead of returning normally.
///
/// The panic is caught at the trampoline boundary (it must never unwind onto
/// a foreign stack) and reported here rather than re-raised in the caller.
pub struct ResumeError {
    message: String,
    payload: Box<dyn Any + Send + 'static>,
}

impl ResumeError {
    pub(crate) fn new(payload: Box<dyn Any + Send + 'static>) -> ResumeError {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };
        ResumeError { message, payload }
    }

    /// The recovered panic payload, for callers that want to downcast it
    /// themselves rather than rely on the rendered message.
    pub fn payload(&self) -> &(dyn Any + Send + 'static) {
        &*self.payload
    }
}

impl fmt::Debug for ResumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumeError").field("message", &self.message).finish()
    }
}

impl fmt::Display for ResumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coroutine panicked: {}", self.message)
    }
}

impl std::error::Error for ResumeError {}

/// Outcome of a completed coroutine, as observed by `join`/`resume`.
pub type ResumeResult<T> = Result<T, ResumeError>;
