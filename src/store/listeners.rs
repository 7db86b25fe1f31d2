// Listener bookkeeping shared by the in-process backends

use super::{Listener, ListenerId, Snapshot, SnapshotEvent};
use crate::path::StorePath;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

struct Slot {
    active: AtomicBool,
    callback: Mutex<Listener>,
}

struct Entry {
    path: StorePath,
    slot: Arc<Slot>,
    /// Last value handed to this listener, used to suppress no-op events
    last: Value,
}

/// A snapshot waiting to be handed to one listener
///
/// Collected while the store lock is held and delivered after it is released,
/// so listeners may call back into the store.
pub struct Dispatch {
    slot: Arc<Slot>,
    event: SnapshotEvent,
}

impl Dispatch {
    pub fn deliver(self) {
        let mut callback = self.slot.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if self.slot.active.load(Ordering::Acquire) {
            (*callback)(self.event);
        }
    }
}

/// A listener that has been removed from the registry
pub struct Detached {
    slot: Arc<Slot>,
}

impl Detached {
    /// Block until any in-flight delivery to this listener has returned
    ///
    /// Must not be called from inside that listener.
    pub fn wait(self) {
        drop(self.slot.callback.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

pub fn deliver_all(dispatches: Vec<Dispatch>) {
    for dispatch in dispatches {
        dispatch.deliver();
    }
}

/// Registered listeners plus the store-wide snapshot version
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    version: u64,
    entries: BTreeMap<ListenerId, Entry>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record that the store applied a change
    pub fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Add a listener and build its initial snapshot from `current`
    pub fn register(&mut self, path: StorePath, listener: Listener, current: Value) -> (ListenerId, Dispatch) {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        let slot = Arc::new(Slot {
            active: AtomicBool::new(true),
            callback: Mutex::new(listener),
        });

        debug!(listener = id.0, path = %path, "register listener");

        let dispatch = Dispatch {
            slot: Arc::clone(&slot),
            event: SnapshotEvent::Value(Snapshot {
                path: path.clone(),
                value: current.clone(),
                version: self.version,
            }),
        };
        self.entries.insert(
            id,
            Entry {
                path,
                slot,
                last: current,
            },
        );
        (id, dispatch)
    }

    /// Detach a listener
    ///
    /// No delivery starts after this returns. One already running on another
    /// thread may still finish; call [`Detached::wait`] once the store lock is
    /// released to be sure it has.
    pub fn remove(&mut self, id: ListenerId) -> Option<Detached> {
        let entry = self.entries.remove(&id)?;
        entry.slot.active.store(false, Ordering::Release);
        debug!(listener = id.0, path = %entry.path, "remove listener");
        Some(Detached { slot: entry.slot })
    }

    /// Snapshots for listeners whose value changed
    ///
    /// `written` limits the check to listeners overlapping that path; `None`
    /// checks everyone. `read` returns the current value at a listener path.
    pub fn changed<E>(
        &mut self,
        written: Option<&StorePath>,
        mut read: impl FnMut(&StorePath) -> Result<Value, E>,
    ) -> Result<Vec<Dispatch>, E> {
        let version = self.version;
        let mut cache: BTreeMap<StorePath, Value> = BTreeMap::new();
        let mut dispatches = Vec::new();

        for entry in self.entries.values_mut() {
            if let Some(written) = written {
                if !entry.path.overlaps(written) {
                    continue;
                }
            }

            let current = match cache.get(&entry.path) {
                Some(value) => value.clone(),
                None => {
                    let value = read(&entry.path)?;
                    cache.insert(entry.path.clone(), value.clone());
                    value
                }
            };

            if current == entry.last {
                continue;
            }
            entry.last = current.clone();
            dispatches.push(Dispatch {
                slot: Arc::clone(&entry.slot),
                event: SnapshotEvent::Value(Snapshot {
                    path: entry.path.clone(),
                    value: current,
                    version,
                }),
            });
        }

        Ok(dispatches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::mpsc;

    fn channel_listener() -> (Listener, mpsc::Receiver<SnapshotEvent>) {
        let (tx, rx) = mpsc::channel();
        let listener: Listener = Box::new(move |event| {
            let _ = tx.send(event);
        });
        (listener, rx)
    }

    fn path(raw: &str) -> StorePath {
        StorePath::parse(raw).unwrap()
    }

    #[test]
    fn test_register_builds_initial_snapshot() {
        let mut registry = ListenerRegistry::new();
        let (listener, rx) = channel_listener();
        let (_, dispatch) = registry.register(path("todolist"), listener, Value::Null);
        dispatch.deliver();

        match rx.try_recv().unwrap() {
            SnapshotEvent::Value(snapshot) => {
                assert_eq!(snapshot.value, Value::Null);
                assert_eq!(snapshot.version, 0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_changed_skips_unrelated_and_unchanged() {
        let mut registry = ListenerRegistry::new();
        let (todo, todo_rx) = channel_listener();
        let (books, books_rx) = channel_listener();
        let (_, d1) = registry.register(path("todolist"), todo, Value::Null);
        let (_, d2) = registry.register(path("booktracker"), books, Value::Null);
        deliver_all(vec![d1, d2]);
        todo_rx.try_recv().unwrap();
        books_rx.try_recv().unwrap();

        registry.bump();
        let written = path("todolist/k1");
        let dispatches = registry
            .changed(Some(&written), |_| Ok::<_, Infallible>(json!({"k1": {"name": "Run"}})))
            .unwrap();
        assert_eq!(dispatches.len(), 1);
        deliver_all(dispatches);
        assert!(todo_rx.try_recv().is_ok());
        assert!(books_rx.try_recv().is_err());

        // Same value again: nothing to deliver
        let dispatches = registry
            .changed(Some(&written), |_| Ok::<_, Infallible>(json!({"k1": {"name": "Run"}})))
            .unwrap();
        assert!(dispatches.is_empty());
    }

    #[test]
    fn test_removed_listener_is_silent() {
        let mut registry = ListenerRegistry::new();
        let (listener, rx) = channel_listener();
        let (id, _initial) = registry.register(path("filmtracker"), listener, Value::Null);
        registry.bump();
        let pending = registry
            .changed(None, |_| Ok::<_, Infallible>(json!({"f": 1})))
            .unwrap();

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        deliver_all(pending);
        assert!(rx.try_recv().is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_waits_for_running_delivery() {
        let mut registry = ListenerRegistry::new();
        let (started_tx, started_rx) = mpsc::channel();
        let finished = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&finished);
        let listener: Listener = Box::new(move |_| {
            let _ = started_tx.send(());
            std::thread::sleep(std::time::Duration::from_millis(50));
            done.store(true, Ordering::SeqCst);
        });
        let (id, initial) = registry.register(path("todolist"), listener, Value::Null);

        let delivery = std::thread::spawn(move || initial.deliver());
        started_rx.recv().unwrap();

        registry.remove(id).unwrap().wait();
        assert!(finished.load(Ordering::SeqCst));
        delivery.join().unwrap();
    }

    #[test]
    fn test_same_path_listeners_are_independent() {
        let mut registry = ListenerRegistry::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (listener, _rx) = channel_listener();
            ids.push(registry.register(path("traveljournal"), listener, Value::Null).0);
        }
        assert_eq!(registry.len(), 3);
        assert!(registry.remove(ids[1]).is_some());
        assert_eq!(registry.len(), 2);
    }
}
