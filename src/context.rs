//! # Run context
//!
//! A [`RunContext`] is the caller-owned value threaded through every agent,
//! tool, guardrail and handoff hook of a run. The runtime only ever clones the
//! handle: the value itself is never copied, reset or persisted, so whatever a
//! tool writes is visible to the next agent after a handoff.
//!
//! The runtime imposes no locking. Mutable state goes behind whatever interior
//! mutability the caller picks (`Mutex`, `RwLock`, atomics).
//!
//! ```rust
//! use std::sync::Mutex;
//! use tower_agents::RunContext;
//!
//! #[derive(Default)]
//! struct Airline {
//!     flight_number: Mutex<Option<String>>,
//! }
//!
//! let ctx = RunContext::new(Airline::default());
//! let handle = ctx.clone();
//! *handle.flight_number.lock().unwrap() = Some("FLT-123".into());
//! assert_eq!(ctx.flight_number.lock().unwrap().as_deref(), Some("FLT-123"));
//! assert!(ctx.shares_with(&handle));
//! ```

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Shared handle to the caller's run-scoped value.
pub struct RunContext<C> {
    inner: Arc<C>,
}

impl<C> RunContext<C> {
    pub fn new(value: C) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    /// Wraps a value the caller already shares.
    pub fn from_arc(inner: Arc<C>) -> Self {
        Self { inner }
    }

    pub fn get(&self) -> &C {
        &self.inner
    }

    /// The underlying shared pointer.
    pub fn as_arc(&self) -> &Arc<C> {
        &self.inner
    }

    /// True when both handles point at the same value.
    pub fn shares_with(&self, other: &RunContext<C>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<C> Clone for RunContext<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Deref for RunContext<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.inner
    }
}

impl<C: Default> Default for RunContext<C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<C> From<Arc<C>> for RunContext<C> {
    fn from(inner: Arc<C>) -> Self {
        Self::from_arc(inner)
    }
}

impl<C: fmt::Debug> fmt::Debug for RunContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RunContext").field(&*self.inner).finish()
    }
}
