//! Sync wrapper for boxed Tower services.
//!
//! `BoxCloneService` is `Send` but not `Sync`, which keeps it out of values
//! shared through `Arc` (agents, runners). [`SharedService`] stores the
//! prototype behind a mutex and hands out clones; the lock is only held for
//! the clone itself, never across a call.

use std::sync::{Mutex, PoisonError};

pub(crate) struct SharedService<S> {
    proto: Mutex<S>,
}

impl<S: Clone> SharedService<S> {
    pub(crate) fn new(service: S) -> Self {
        Self {
            proto: Mutex::new(service),
        }
    }

    /// A fresh clone of the wrapped service, ready for `oneshot`.
    pub(crate) fn get(&self) -> S {
        // Cloning cannot leave the prototype half-updated, so a poisoned lock is still usable.
        self.proto
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn replace(&mut self, service: S) {
        *self.proto.get_mut().unwrap_or_else(PoisonError::into_inner) = service;
    }
}

impl<S: Clone> Clone for SharedService<S> {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}
