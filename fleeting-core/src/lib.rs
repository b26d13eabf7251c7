//! # Fleeting Core
//!
//! An ephemeral registry of JSON records with a fixed time-to-live.
//!
//! ## Features
//!
//! - Arbitrary JSON objects, stamped with their arrival time on insert
//! - Lazy expiry: every write and every read prunes entries older than the window
//! - Presence filter and stable keyed sort over consistent snapshots
//! - Pluggable persistence: memory, local file, GitHub Gist, Firebase Realtime Database
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use fleeting_core::{ListQuery, MemoryBackend, RegistryConfig, SortOrder, Store};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RegistryConfig::default()
//!         .with_expiration_window(Duration::from_secs(300));
//!     let store = Store::open(config, Arc::new(MemoryBackend::new())).await;
//!
//!     store.register(json!({"name": "alice", "score": 3})).await.unwrap();
//!     store.register(json!({"name": "bob"})).await.unwrap();
//!
//!     // Only entries that have a score, highest first
//!     let query = ListQuery::new()
//!         .with_filter("score")
//!         .with_sort("score", SortOrder::Desc);
//!     let outcome = store.list(&query).await;
//!     assert_eq!(outcome.entries.len(), 1);
//! }
//! ```

pub mod backend;
mod clock;
mod config;
mod entry;
mod error;
mod query;
mod store;

pub use backend::{
    Backend, FileBackend, FirebaseBackend, FirebaseConfig, GistBackend, GistConfig, MemoryBackend,
    DEFAULT_DATA_FILE, DEFAULT_HTTP_TIMEOUT,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RegistryConfig, DEFAULT_EXPIRATION_WINDOW};
pub use entry::{format_timestamp, parse_timestamp, Entry, ID_FIELD, TIMESTAMP_FIELD};
pub use error::{ConfigError, PersistenceError, RegistryError, SortError};
pub use query::{filter_entries, sort_entries, ListQuery, QueryOutcome, SortOrder};
pub use store::{Collection, Snapshot, Store};
