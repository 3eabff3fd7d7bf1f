//! Session registry - pure data storage for live sessions
//!
//! Maps effective names to the PID of the running session. All mutation
//! happens under one mutex: callers that need check-then-insert atomicity
//! (the duplicate-name check) hold the guard across both steps.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// Live sessions, keyed by effective name.
///
/// Invariant: an empty registry means no tracked process is runnable
/// (modulo not-yet-killed cgroup stragglers).
#[derive(Default)]
pub struct SessionRegistry {
    children: Mutex<HashMap<String, u32>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the registry for a check-then-insert sequence.
    pub fn lock(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove a reaped session. Returns its PID if it was present.
    pub fn remove(&self, name: &str) -> Option<u32> {
        self.lock().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
