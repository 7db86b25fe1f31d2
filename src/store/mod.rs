// Path-addressed document store contract and its backends

pub mod file;
pub mod jsonl;
pub mod listeners;
pub mod memory;
pub mod rtdb;
pub mod sse;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use rtdb::RtdbStore;

use crate::path::StorePath;
use serde_json::Value;

/// Errors surfaced by a document store
///
/// Nothing here is retried by the library; callers decide what to do.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("cannot encode value: {0}")]
    Encode(String),
}

impl StoreError {
    /// Wrap an eyre report from backend internals, keeping its context chain
    pub fn storage(err: eyre::Report) -> Self {
        StoreError::Storage(format!("{:#}", err))
    }
}

/// Full value at a path, as delivered to listeners
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: StorePath,
    pub value: Value,
    /// Increases with every change the store has applied; never reused
    pub version: u64,
}

/// What a listener receives
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    Value(Snapshot),
    /// Terminal: the listener gets nothing after this
    Error(StoreError),
}

pub type Listener = Box<dyn FnMut(SnapshotEvent) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// A realtime, path-addressed document store
///
/// Listeners get the value at their path once right after registration and
/// again after every write that changes it, wherever that write came from.
/// Writing `null` is a delete.
pub trait DocumentStore: Send + Sync {
    /// Register `listener` on `path`
    fn on_snapshot(&self, path: &StorePath, listener: Listener) -> Result<ListenerId, StoreError>;

    /// Detach a listener; unknown ids are ignored
    fn off(&self, id: ListenerId);

    /// Current value at `path`, `Value::Null` when absent
    fn get(&self, path: &StorePath) -> Result<Value, StoreError>;

    /// Write `value` under a freshly generated key below `path`, returning the key
    fn write_generated(&self, path: &StorePath, value: Value) -> Result<String, StoreError>;

    /// Overwrite the value at `path`
    fn write_exact(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    fn delete(&self, path: &StorePath) -> Result<(), StoreError>;

    /// Pick up changes made outside this process and notify listeners
    fn refresh(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// New push key: UUIDv7 in simple form, so key order is creation order
pub fn generate_key() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}
