//! Suppression of the ambient resume context
//!
//! A thread may carry a [`ResumeContext`]: the place where continuations
//! started on that thread are resumed. When synchronous code blocks on
//! asynchronous work whose continuations would resume on the blocked thread,
//! the two deadlock. An [`AsyncScope`] clears the context for its lifetime so
//! those continuations run wherever they are, and restores it afterwards.
//!
//! # Example
//!
//! ```rust
//! use latchpool::scope::{self, AsyncScope};
//!
//! {
//!     let _scope = AsyncScope::enter();
//!     assert!(scope::current().is_none());
//!     // block on async work here
//! }
//! ```

use crate::launcher::Job;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

/// Where continuations started on a thread are resumed
pub trait ResumeContext: Send + Sync {
    /// Run `job` in this context
    fn resume(&self, job: Job);
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn ResumeContext>>> = const { RefCell::new(None) };
}

/// The calling thread's resume context, if any
#[must_use]
pub fn current() -> Option<Arc<dyn ResumeContext>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Install `context` on the calling thread, returning the one it replaces
pub fn set_current(context: Option<Arc<dyn ResumeContext>>) -> Option<Arc<dyn ResumeContext>> {
    CURRENT.with(|current| current.replace(context))
}

/// Run `job` in the calling thread's resume context, or right here if there
/// is none
pub fn resume(job: Job) {
    match current() {
        Some(context) => context.resume(job),
        None => job(),
    }
}

/// Clears the thread's resume context until dropped
///
/// Entering saves the current context and clears it; dropping the scope puts
/// the saved context back, including when unwinding. Scopes nest.
#[must_use = "the context is restored as soon as the scope is dropped"]
pub struct AsyncScope {
    previous: Option<Arc<dyn ResumeContext>>,
    // Restores a thread-local, so it must be dropped on the thread that made it
    _not_send: PhantomData<*const ()>,
}

impl AsyncScope {
    /// Save and clear the calling thread's resume context
    pub fn enter() -> Self {
        Self {
            previous: set_current(None),
            _not_send: PhantomData,
        }
    }

    /// Restore the saved context now
    pub fn exit(self) {
        drop(self);
    }
}

impl Drop for AsyncScope {
    fn drop(&mut self) {
        set_current(self.previous.take());
    }
}

impl std::fmt::Debug for AsyncScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncScope")
            .field("restores_context", &self.previous.is_some())
            .finish()
    }
}
