//! Registry of in-flight calls for one connection.
//!
//! Maps each active call id to the cancellation scope of its handler. An id
//! is present exactly while its handler runs. Entries leave the registry
//! once, through whichever comes first: an explicit cancel or the handler
//! finishing. The loser of that race finds nothing to remove, which is not an
//! error.
//!
//! Every registration carries a generation number. A client may reuse an id
//! right after cancelling it; when the old handler finally returns it only
//! removes its own generation, never the newer call holding the same id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::call::CallId;
use crate::cancel::CancelScope;
use crate::{Result, StreamError};

struct ActiveCall {
    generation: u64,
    scope: CancelScope,
}

#[derive(Default)]
struct RegistryState {
    calls: HashMap<CallId, ActiveCall>,
    next_generation: u64,
}

/// Active-call registry guarded by a single lock.
pub struct ActiveCalls {
    state: Mutex<RegistryState>,
    limit: usize,
}

impl ActiveCalls {
    /// Create an empty registry admitting at most `limit` calls at once.
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            limit,
        }
    }

    // Every critical section leaves the map consistent, so a poisoned lock
    // still holds valid state.
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a call scope under its id.
    ///
    /// The returned guard removes the entry when dropped, unless a cancel
    /// removed it first.
    pub fn register(&self, id: &CallId, scope: CancelScope) -> Result<ActiveCallGuard<'_>> {
        let mut state = self.state();
        if state.calls.contains_key(id) {
            return Err(StreamError::DuplicateCall { id: id.to_string() });
        }
        if state.calls.len() >= self.limit {
            return Err(StreamError::TooManyCalls { limit: self.limit });
        }
        let generation = state.next_generation;
        state.next_generation += 1;
        state
            .calls
            .insert(id.clone(), ActiveCall { generation, scope });

        Ok(ActiveCallGuard {
            registry: self,
            id: id.clone(),
            generation,
        })
    }

    /// Cancel and remove an active call.
    ///
    /// Returns `false` if no call with that id is registered.
    pub fn cancel(&self, id: &str) -> bool {
        let removed = self.state().calls.remove(id);
        match removed {
            Some(call) => {
                call.scope.cancel();
                true
            }
            None => false,
        }
    }

    fn complete(&self, id: &CallId, generation: u64) -> bool {
        let mut state = self.state();
        let current = state.calls.get(id).map(|call| call.generation);
        if current == Some(generation) {
            state.calls.remove(id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state().calls.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().calls.is_empty()
    }

    /// Ids of all active calls, sorted.
    pub fn ids(&self) -> Vec<CallId> {
        let mut ids: Vec<_> = self.state().calls.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Removes a call's registry entry when its handler's execution ends.
pub struct ActiveCallGuard<'a> {
    registry: &'a ActiveCalls,
    id: CallId,
    generation: u64,
}

impl ActiveCallGuard<'_> {
    pub fn id(&self) -> &CallId {
        &self.id
    }
}

impl Drop for ActiveCallGuard<'_> {
    fn drop(&mut self) {
        self.registry.complete(&self.id, self.generation);
    }
}
