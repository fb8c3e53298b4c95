//! Cooperative cancellation.
//!
//! A [`CancelToken`] is a clonable atomic flag. The process signal handler
//! (or a supervising thread) sets it; every blocking channel primitive and
//! both state machines poll it and bail out with
//! [`Error::Interrupted`](crate::Error::Interrupted). Cancellation is
//! best-effort: a packet already on the wire may still be delivered, and the
//! receiver's checkpoint keeps the next run consistent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Safe to call from a signal handler thread.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
