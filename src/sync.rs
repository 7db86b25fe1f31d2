// Live collection sync: subscribe, project, write through

use crate::live::{Live, LiveCollection, LiveDocument, SyncMode};
use crate::path::StorePath;
use crate::record::{Fields, Record, project_document, project_records};
use crate::store::{DocumentStore, StoreError};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Adapter between a shared store handle and the views built on it
///
/// Cheap to clone; every clone talks to the same store. Mutations are
/// write-through: they return once the store acknowledges, and subscribed
/// views change only when the resulting snapshot is applied (unless a view
/// opted into [`SyncMode::Optimistic`]). Failed writes are returned as-is and
/// never retried.
#[derive(Clone)]
pub struct CollectionSync {
    store: Arc<dyn DocumentStore>,
    mode: SyncMode,
}

impl CollectionSync {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            mode: SyncMode::default(),
        }
    }

    /// Default mode for subscriptions opened through this adapter
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Subscribe to a keyed collection
    pub fn subscribe<F: Fields>(&self, path: &str) -> Result<LiveCollection<F>, StoreError> {
        self.subscribe_with_mode(path, self.mode)
    }

    pub fn subscribe_with_mode<F: Fields>(&self, path: &str, mode: SyncMode) -> Result<LiveCollection<F>, StoreError> {
        Live::open(Arc::clone(&self.store), StorePath::parse(path)?, mode)
    }

    /// Subscribe to a singleton path
    pub fn subscribe_document<F: Fields>(&self, path: &str) -> Result<LiveDocument<F>, StoreError> {
        Live::open(Arc::clone(&self.store), StorePath::parse(path)?, self.mode)
    }

    /// Write `fields` under a store-generated key below `path`
    pub fn append<F: Serialize>(&self, path: &str, fields: &F) -> Result<String, StoreError> {
        let path = StorePath::parse(path)?;
        let id = self.store.write_generated(&path, encode(fields)?)?;
        debug!(path = %path, id = %id, "append");
        Ok(id)
    }

    /// Overwrite the value at an exact path
    pub fn put<F: Serialize>(&self, path: &str, fields: &F) -> Result<(), StoreError> {
        let path = StorePath::parse(path)?;
        self.store.write_exact(&path, encode(fields)?)?;
        debug!(path = %path, "put");
        Ok(())
    }

    /// Delete the value at an exact path; absent paths are fine
    pub fn remove_at(&self, path: &str) -> Result<(), StoreError> {
        let path = StorePath::parse(path)?;
        self.store.delete(&path)?;
        debug!(path = %path, "remove_at");
        Ok(())
    }

    /// One-shot read of a keyed collection
    pub fn read<F: Fields>(&self, path: &str) -> Result<Vec<Record<F>>, StoreError> {
        let path = StorePath::parse(path)?;
        let value = self.store.get(&path)?;
        Ok(project_records(&path.as_string(), &value))
    }

    /// One-shot read of a singleton path
    pub fn read_document<F: Fields>(&self, path: &str) -> Result<Option<F>, StoreError> {
        let path = StorePath::parse(path)?;
        let value = self.store.get(&path)?;
        Ok(project_document(&path.as_string(), &value))
    }

    /// Pull changes other processes made (file store)
    pub fn refresh(&self) -> Result<(), StoreError> {
        self.store.refresh()
    }
}

pub(crate) fn encode<F: Serialize>(fields: &F) -> Result<Value, StoreError> {
    serde_json::to_value(fields).map_err(|e| StoreError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore};
    use serde::Deserialize;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
    struct Todo {
        name: String,
        category: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Water {
        water: u32,
        goal: u32,
    }

    fn todo(name: &str, category: &str) -> Todo {
        Todo {
            name: name.to_string(),
            category: category.to_string(),
        }
    }

    fn memory() -> CollectionSync {
        CollectionSync::new(Arc::new(MemoryStore::new()))
    }

    fn file(temp: &TempDir) -> CollectionSync {
        CollectionSync::new(Arc::new(FileStore::open(temp.path()).unwrap()))
    }

    /// Run a property against every in-process backend
    fn each_backend(check: impl Fn(CollectionSync)) {
        check(memory());
        let temp = TempDir::new().unwrap();
        check(file(&temp));
    }

    #[test]
    fn test_fresh_subscribe_sees_exactly_the_appended_set() {
        each_backend(|sync| {
            let items = [
                todo("Buy milk", "Groceries"),
                todo("Renew passport", "Documents"),
                todo("Buy milk", "Groceries"),
                todo("Swim", "Sport"),
            ];
            let mut ids = BTreeSet::new();
            for item in &items {
                ids.insert(sync.append("todolist/", item).unwrap());
            }
            assert_eq!(ids.len(), 4);

            let mut live: LiveCollection<Todo> = sync.subscribe("todolist").unwrap();
            live.poll();
            let seen_ids: BTreeSet<String> = live.records().iter().map(|r| r.id.clone()).collect();
            let mut seen: Vec<Todo> = live.records().iter().map(|r| r.fields.clone()).collect();
            let mut written = items.to_vec();
            seen.sort();
            written.sort();
            assert_eq!(seen_ids, ids);
            assert_eq!(seen, written);
        });
    }

    #[test]
    fn test_removed_id_never_reappears() {
        each_backend(|sync| {
            let mut live: LiveCollection<Todo> = sync.subscribe("todolist").unwrap();
            let keep = sync.append("todolist", &todo("Read", "Study")).unwrap();
            let gone = sync.append("todolist", &todo("Run", "Sport")).unwrap();
            sync.remove_at(&format!("todolist/{}", gone)).unwrap();

            live.poll();
            assert!(live.get(&gone).is_none());
            assert!(live.get(&keep).is_some());
            assert!(sync.read::<Todo>("todolist").unwrap().iter().all(|r| r.id != gone));
        });
    }

    #[test]
    fn test_cancelled_listener_never_fires() {
        each_backend(|sync| {
            let mut live: LiveCollection<Todo> = sync.subscribe("todolist").unwrap();
            let fired = Arc::new(Mutex::new(0));
            let counter = Arc::clone(&fired);
            live.on_change(move |_| *counter.lock().unwrap() += 1);

            live.cancel();
            sync.append("todolist", &todo("Buy milk", "Groceries")).unwrap();
            sync.remove_at("todolist").unwrap();
            live.poll();

            assert_eq!(*fired.lock().unwrap(), 0);
            assert!(live.is_empty());
        });
    }

    #[test]
    fn test_put_is_last_write_wins() {
        each_backend(|sync| {
            sync.put("watertracker/2024-01-01", &Water { water: 250, goal: 2000 }).unwrap();
            sync.put("watertracker/2024-01-01", &Water { water: 500, goal: 2000 }).unwrap();

            let day: Option<Water> = sync.read_document("watertracker/2024-01-01").unwrap();
            assert_eq!(day, Some(Water { water: 500, goal: 2000 }));
        });
    }

    #[test]
    fn test_singleton_snapshots_never_accumulate() {
        each_backend(|sync| {
            let mut day: LiveDocument<Water> = sync.subscribe_document("watertracker/2024-01-01").unwrap();
            sync.put("watertracker/2024-01-01", &Water { water: 250, goal: 2000 }).unwrap();
            sync.put("watertracker/2024-01-01", &Water { water: 500, goal: 2000 }).unwrap();

            day.poll();
            assert_eq!(day.value(), Some(&Water { water: 500, goal: 2000 }));
        });
    }

    #[test]
    fn test_empty_subscribe_then_one_append_gives_one_event() {
        each_backend(|sync| {
            let mut live: LiveCollection<Todo> = sync.subscribe("todolist").unwrap();
            assert_eq!(live.poll(), 1);
            assert!(live.is_empty());

            let id = sync.append("todolist", &todo("Buy milk", "Groceries")).unwrap();
            assert_eq!(live.poll(), 1);
            assert_eq!(live.records(), &[Record::new(id, todo("Buy milk", "Groceries"))]);
            assert_eq!(live.poll(), 0);
        });
    }

    #[test]
    fn test_identical_fields_are_distinct_records() {
        each_backend(|sync| {
            let mut live: LiveCollection<Todo> = sync.subscribe("todolist").unwrap();
            let a = sync.append("todolist", &todo("Stretch", "Health")).unwrap();
            let b = sync.append("todolist", &todo("Stretch", "Health")).unwrap();
            assert_ne!(a, b);

            sync.remove_at(&format!("todolist/{}", a)).unwrap();
            live.poll();
            assert_eq!(live.records(), &[Record::new(b, todo("Stretch", "Health"))]);
        });
    }

    #[test]
    fn test_other_subscribers_see_each_others_writes() {
        let sync = memory();
        let mut mine: LiveCollection<Todo> = sync.subscribe("todolist").unwrap();
        let mut theirs: LiveCollection<Todo> = sync.clone().subscribe("todolist").unwrap();

        theirs.append(&todo("Call mum", "Personal")).unwrap();
        mine.poll();
        theirs.poll();
        assert_eq!(mine.records(), theirs.records());
        assert_eq!(mine.len(), 1);
    }

    #[test]
    fn test_invalid_paths_fail_before_io() {
        let sync = memory();
        assert!(matches!(
            sync.append("todo.list", &todo("a", "b")),
            Err(StoreError::InvalidPath(_))
        ));
        assert!(sync.subscribe::<Todo>("a//b").is_err());
        assert!(sync.remove_at("$x").is_err());
    }

    #[test]
    fn test_malformed_collection_projects_empty() {
        let sync = memory();
        sync.put("todolist", &"not a mapping").unwrap();
        let mut live: LiveCollection<Todo> = sync.subscribe("todolist").unwrap();
        live.poll();
        assert!(live.is_empty());
        assert!(sync.read::<Todo>("todolist").unwrap().is_empty());
    }

    #[test]
    fn test_default_mode_is_inherited() {
        let sync = memory().with_mode(SyncMode::Optimistic);
        let mut live: LiveCollection<Todo> = sync.subscribe("todolist").unwrap();
        assert_eq!(live.mode(), SyncMode::Optimistic);
        live.append(&todo("Now", "Other")).unwrap();
        assert_eq!(live.len(), 1);

        let plain = sync.subscribe_with_mode::<Todo>("todolist", SyncMode::WaitForSnapshot).unwrap();
        assert_eq!(plain.mode(), SyncMode::WaitForSnapshot);
    }
}
