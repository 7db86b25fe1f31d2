// lifetrack - Live collection sync for a personal life tracker

pub mod books;
pub mod config;
pub mod live;
pub mod path;
pub mod record;
pub mod store;
pub mod sync;
pub mod trackers;
pub mod tree;

// Re-export main types for convenience
pub use books::{BookSearch, SearchFilters, SearchOrder};
pub use config::{Backend, Config};
pub use live::{Live, LiveCollection, LiveDocument, SubscriptionState, SyncMode};
pub use path::StorePath;
pub use record::{Fields, Record};
pub use store::{DocumentStore, FileStore, MemoryStore, RtdbStore, Snapshot, SnapshotEvent, StoreError};
pub use sync::CollectionSync;
