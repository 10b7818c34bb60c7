//! Process-local registered handle pool
//!
//! Every imported buffer is tracked here until it is freed. The pool
//! guarantees that a given raw descriptor identity maps to exactly one
//! logical handle while it is live: a second `add` of the same identity is
//! refused, which signals that a prior handle escaped through a
//! non-standard release path instead of the designated free operation.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::handle::ImportedHandle;

/// Process-local bookkeeping for imported buffers. Never shared across
/// processes; all access is serialized by an internal lock.
#[derive(Debug, Default)]
pub struct RegisteredHandlePool {
    handles: Mutex<HashMap<RawFd, Arc<ImportedHandle>>>,
}

impl RegisteredHandlePool {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Register an imported handle. Returns false when the identity is
    /// already present, leaving the pool unchanged.
    pub fn add(&self, handle: Arc<ImportedHandle>) -> bool {
        let mut handles = self.handles.lock();
        let key = handle.key();
        if handles.contains_key(&key) {
            return false;
        }
        handles.insert(key, handle);
        true
    }

    /// Look up a live handle by its identity
    pub fn get(&self, key: RawFd) -> Option<Arc<ImportedHandle>> {
        self.handles.lock().get(&key).cloned()
    }

    /// Remove a handle, yielding it for destruction. The only path that
    /// releases a registration.
    pub fn remove(&self, key: RawFd) -> Option<Arc<ImportedHandle>> {
        self.handles.lock().remove(&key)
    }

    /// Whether the identity is currently registered
    pub fn is_registered(&self, key: RawFd) -> bool {
        self.handles.lock().contains_key(&key)
    }

    /// Visit every live handle without disturbing registration state
    pub fn for_each<F: FnMut(&Arc<ImportedHandle>)>(&self, mut visitor: F) {
        let handles = self.handles.lock();
        for handle in handles.values() {
            visitor(handle);
        }
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}
