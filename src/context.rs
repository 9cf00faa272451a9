//! Cancellation contexts threaded through every core operation.
//!
//! A `Context` carries a cancellation flag, an optional deadline, and a link
//! to its parent. Cancelling a context cancels its children; a child with
//! its own deadline expires independently of the parent. Hook execution
//! derives its context from `Context::background()` rather than the caller
//! so hook timeouts stay deterministic when the outer call is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug)]
struct CancelState {
    flag: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Arc<CancelState>>,
}

impl CancelState {
    fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Acquire) {
            return true;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        match &self.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }
}

/// A cancellation context. Cheap to clone; clones share the same state.
#[derive(Debug, Clone)]
pub struct Context {
    state: Arc<CancelState>,
}

impl Context {
    /// A root context that is never cancelled externally.
    pub fn background() -> Self {
        Self {
            state: Arc::new(CancelState {
                flag: AtomicBool::new(false),
                deadline: None,
                parent: None,
            }),
        }
    }

    /// Derive a child context that can be cancelled independently.
    ///
    /// The child observes the parent's cancellation; the parent never
    /// observes the child's.
    pub fn child(&self) -> Self {
        Self {
            state: Arc::new(CancelState {
                flag: AtomicBool::new(false),
                deadline: None,
                parent: Some(Arc::clone(&self.state)),
            }),
        }
    }

    /// Derive a child context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            state: Arc::new(CancelState {
                flag: AtomicBool::new(false),
                deadline: Some(Instant::now() + timeout),
                parent: Some(Arc::clone(&self.state)),
            }),
        }
    }

    /// Cancel this context and all contexts derived from it.
    pub fn cancel(&self) {
        self.state.flag.store(true, Ordering::Release);
    }

    /// Whether this context (or any ancestor) has been cancelled or expired.
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Return `Err(Cancelled)` if the context is done, `Ok(())` otherwise.
    ///
    /// Call at suspension points so cancellation propagates cooperatively.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Time remaining before the nearest deadline in the chain, if any.
    pub fn remaining(&self) -> Option<Duration> {
        let mut nearest: Option<Instant> = None;
        let mut state = Some(&self.state);
        while let Some(current) = state {
            if let Some(deadline) = current.deadline {
                nearest = Some(match nearest {
                    Some(existing) => existing.min(deadline),
                    None => deadline,
                });
            }
            state = current.parent.as_ref();
        }
        nearest.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}
