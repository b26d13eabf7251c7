use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backend::Backend;
use crate::clock::{Clock, SystemClock};
use crate::config::RegistryConfig;
use crate::entry::{generate_id, Entry};
use crate::error::RegistryError;
use crate::query::{ListQuery, QueryOutcome};

/// Immutable, ordered view of the collection at one point in time
pub type Snapshot = Arc<Vec<Entry>>;

/// Insertion-ordered set of live entries
///
/// Copy-on-write: snapshots share the backing vector until the next mutation,
/// so handing one out never blocks or observes later writes.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    entries: Arc<Vec<Entry>>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<Entry>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    /// Stamps `raw` with `now` and appends it
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidPayload` if `raw` is not a JSON object.
    /// The collection is left untouched in that case.
    pub fn insert(&mut self, raw: Value, now: DateTime<Utc>, assign_id: bool) -> Result<&Entry, RegistryError> {
        let fields = match raw {
            Value::Object(fields) => fields,
            other => {
                return Err(RegistryError::InvalidPayload(format!(
                    "expected a JSON object, got {}",
                    describe(&other)
                )))
            }
        };

        let mut entry = Entry::stamped(fields, now);
        if assign_id {
            entry = entry.with_id(generate_id());
        }

        let entries = Arc::make_mut(&mut self.entries);
        entries.push(entry);
        Ok(&entries[entries.len() - 1])
    }

    /// Drops every entry whose timestamp is at or before `now - window`, or unreadable
    ///
    /// Returns the number of surviving entries.
    pub fn prune_expired(&mut self, now: DateTime<Utc>, window: chrono::Duration) -> usize {
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

        if self.entries.iter().any(|e| e.is_expired(cutoff)) {
            let mut expired = 0usize;
            Arc::make_mut(&mut self.entries).retain(|entry| match entry.timestamp() {
                Some(ts) if ts > cutoff => true,
                Some(_) => {
                    expired += 1;
                    false
                }
                None => {
                    tracing::warn!(
                        "Skipping entry with missing or invalid timestamp: {:?}",
                        entry.get(crate::entry::TIMESTAMP_FIELD)
                    );
                    false
                }
            });
            if expired > 0 {
                tracing::debug!("Pruned {} expired entries", expired);
            }
        }

        self.entries.len()
    }

    /// Cheap, immutable copy of the current entries in insertion order
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.entries)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Internal shared state for the store
struct StoreInner {
    /// Held across mutate-and-persist so concurrent requests never interleave
    collection: Mutex<Collection>,
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
}

/// Shared handle to the expiring collection and its backing medium
///
/// Cloning is cheap; all clones see the same collection. Expiry is lazy: every
/// `register` and `list` prunes before doing anything else, and there is no
/// background sweep.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use fleeting_core::{FileBackend, ListQuery, RegistryConfig, SortOrder, Store};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() {
///     let backend = Arc::new(FileBackend::new("/tmp/data.json"));
///     let store = Store::open(RegistryConfig::default(), backend).await;
///
///     let live = store.register(json!({"name": "alice"})).await.unwrap();
///     println!("{} live entries", live);
///
///     let outcome = store
///         .list(&ListQuery::new().with_sort("name", SortOrder::Asc))
///         .await;
///     println!("{:?}", outcome.entries);
/// }
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Opens a store on `backend` using the system clock
    ///
    /// The collection is read from the backend once. If that read fails the
    /// failure is logged and the store starts empty.
    pub async fn open(config: RegistryConfig, backend: Arc<dyn Backend>) -> Self {
        Self::open_with_clock(config, backend, Arc::new(SystemClock)).await
    }

    /// Opens a store with an explicit time source
    pub async fn open_with_clock(
        config: RegistryConfig,
        backend: Arc<dyn Backend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let collection = match backend.load().await {
            Ok(entries) => {
                tracing::info!("Loaded {} entries from {} backend", entries.len(), backend.name());
                Collection::from_entries(entries)
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read from {} backend, starting with an empty collection: {}",
                    backend.name(),
                    e
                );
                Collection::new()
            }
        };

        Self {
            inner: Arc::new(StoreInner {
                collection: Mutex::new(collection),
                backend,
                clock,
                config,
            }),
        }
    }

    /// Stamps and appends `raw`, prunes expired entries, then persists
    ///
    /// Returns the number of live entries after pruning.
    ///
    /// # Errors
    ///
    /// - `RegistryError::InvalidPayload` if `raw` is not a JSON object. Nothing
    ///   is stored.
    /// - `RegistryError::PersistenceWriteFailed` if the backend rejects the
    ///   write. The in-memory collection keeps the new entry regardless.
    pub async fn register(&self, raw: Value) -> Result<usize, RegistryError> {
        let window = self.inner.config.window();
        let assign_id = self.inner.backend.assigns_ids();

        let mut collection = self.inner.collection.lock().await;
        // Read under the lock so insertion order matches timestamp order
        let now = self.inner.clock.now();
        collection.insert(raw, now, assign_id)?;
        let live = collection.prune_expired(now, window);

        if let Err(e) = self.inner.backend.save(&collection.snapshot()).await {
            tracing::error!("Failed to write to {} backend: {}", self.inner.backend.name(), e);
            return Err(RegistryError::PersistenceWriteFailed(e));
        }

        tracing::debug!("REGISTER ok (live entries: {})", live);
        Ok(live)
    }

    /// Prunes, then filters and sorts a snapshot of the collection
    ///
    /// The query runs after the lock is released. A failed write of the pruned
    /// collection is logged and does not fail the read.
    pub async fn list(&self, query: &ListQuery) -> QueryOutcome {
        let snapshot = self.prune().await;
        let outcome = query.apply(&snapshot);

        if let Some(reason) = &outcome.sort_skipped {
            tracing::warn!("Sorting skipped: {}", reason);
        }
        tracing::debug!(
            "LIST filter={:?} sort={:?} order={:?} -> {} entries",
            query.filter,
            query.sort,
            query.order,
            outcome.entries.len()
        );
        outcome
    }

    /// Drops expired entries, persisting only if something was removed
    ///
    /// Returns the post-prune snapshot.
    pub async fn prune(&self) -> Snapshot {
        let window = self.inner.config.window();

        let mut collection = self.inner.collection.lock().await;
        let now = self.inner.clock.now();
        let before = collection.len();
        let live = collection.prune_expired(now, window);

        if live != before {
            if let Err(e) = self.inner.backend.save(&collection.snapshot()).await {
                tracing::warn!(
                    "Failed to persist pruned collection to {} backend: {}",
                    self.inner.backend.name(),
                    e
                );
            }
        }
        collection.snapshot()
    }

    /// Current entries without pruning
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.collection.lock().await.snapshot()
    }

    /// Number of entries currently held (including ones not yet pruned)
    pub async fn len(&self) -> usize {
        self.inner.collection.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }
}
