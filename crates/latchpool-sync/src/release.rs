//! Single-shot broadcast release point
//!
//! A [`ReleasePoint`] fires exactly once. Every attachment made before it
//! fires resolves when it fires; attachments made afterwards are refused so
//! the caller can complete immediately without suspending.

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Future handed to each waiter attached to a [`ReleasePoint`]
///
/// All clones share one underlying receiver, so firing wakes every waiter
/// through the shared notifier instead of a per-waiter signal.
pub(crate) type Released = Shared<oneshot::Receiver<()>>;

pub(crate) struct ReleasePoint {
    /// Set before the trigger is consumed; never cleared
    fired: AtomicBool,
    /// Sending side of the broadcast, taken by the one call that fires
    trigger: Mutex<Option<oneshot::Sender<()>>>,
    released: Released,
}

impl ReleasePoint {
    pub(crate) fn new() -> Self {
        let (trigger, released) = oneshot::channel();
        Self {
            fired: AtomicBool::new(false),
            trigger: Mutex::new(Some(trigger)),
            released: released.shared(),
        }
    }

    /// Create a release point that has already fired
    pub(crate) fn fired() -> Self {
        let point = Self::new();
        point.fire();
        point
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Fire the release point, waking every attached waiter
    ///
    /// Returns `true` only for the call that actually fired it.
    pub(crate) fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }

        let trigger = self
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(trigger) = trigger {
            // The receiver lives inside `self.released`, so it cannot be gone.
            let _ = trigger.send(());
        }
        true
    }

    /// Attach a waiter, or `None` if the point has already fired
    pub(crate) fn attach(&self) -> Option<Released> {
        if self.is_fired() {
            None
        } else {
            Some(self.released.clone())
        }
    }
}

impl std::fmt::Debug for ReleasePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleasePoint")
            .field("fired", &self.is_fired())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_is_idempotent() {
        let point = ReleasePoint::new();
        assert!(!point.is_fired());

        assert!(point.fire());
        assert!(point.is_fired());

        assert!(!point.fire());
        assert!(point.is_fired());
    }

    #[test]
    fn test_attach_after_fire_is_refused() {
        let point = ReleasePoint::fired();
        assert!(point.attach().is_none());
    }

    #[test]
    fn test_attached_waiters_all_resolve() {
        let point = ReleasePoint::new();

        let waiters: Vec<_> = (0..16).map(|_| point.attach().unwrap()).collect();
        for waiter in &waiters {
            assert!(waiter.clone().now_or_never().is_none());
        }

        point.fire();

        for waiter in waiters {
            assert!(waiter.now_or_never().is_some());
        }
    }
}
