// In-process document store

use super::listeners::{ListenerRegistry, deliver_all};
use super::{DocumentStore, Listener, ListenerId, StoreError, generate_key};
use crate::path::StorePath;
use crate::tree;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Default)]
struct Inner {
    root: Value,
    listeners: ListenerRegistry,
}

/// Document tree held in memory behind one mutex
///
/// Writes are serialized; listeners are called after the lock is released.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `root`
    pub fn with_value(root: Value) -> Self {
        Self {
            inner: Mutex::new(Inner {
                root: tree::normalize(root),
                listeners: ListenerRegistry::new(),
            }),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, path: &StorePath, value: Value) {
        let dispatches = {
            let mut inner = self.lock();
            let before = tree::get_at(&inner.root, path.segments());
            tree::set_at(&mut inner.root, path.segments(), value);
            if tree::get_at(&inner.root, path.segments()) == before {
                debug!(path = %path, "write left value unchanged");
                return;
            }

            inner.listeners.bump();
            let Inner { root, listeners } = &mut *inner;
            match listeners.changed(Some(path), |p| Ok::<_, Infallible>(tree::get_at(root, p.segments()))) {
                Ok(dispatches) => dispatches,
                Err(never) => match never {},
            }
        };
        deliver_all(dispatches);
    }
}

impl DocumentStore for MemoryStore {
    fn on_snapshot(&self, path: &StorePath, listener: Listener) -> Result<ListenerId, StoreError> {
        let (id, initial) = {
            let mut inner = self.lock();
            let current = tree::get_at(&inner.root, path.segments());
            inner.listeners.register(path.clone(), listener, current)
        };
        initial.deliver();
        Ok(id)
    }

    fn off(&self, id: ListenerId) {
        let detached = self.lock().listeners.remove(id);
        if let Some(detached) = detached {
            detached.wait();
        }
    }

    fn get(&self, path: &StorePath) -> Result<Value, StoreError> {
        Ok(tree::get_at(&self.lock().root, path.segments()))
    }

    fn write_generated(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let key = generate_key();
        let target = path.child(&key)?;
        debug!(path = %target, "write_generated");
        self.apply(&target, value);
        Ok(key)
    }

    fn write_exact(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        debug!(path = %path, "write_exact");
        self.apply(path, value);
        Ok(())
    }

    fn delete(&self, path: &StorePath) -> Result<(), StoreError> {
        debug!(path = %path, "delete");
        self.apply(path, Value::Null);
        Ok(())
    }
}
