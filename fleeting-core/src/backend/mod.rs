//! Persistence backends for the entry collection.
//!
//! A backend only knows how to load the whole collection and replace it. The
//! store decides when to call either; it never depends on which backend is
//! active.

mod file;
mod firebase;
mod gist;
mod memory;

pub use file::{FileBackend, DEFAULT_DATA_FILE};
pub use firebase::{FirebaseBackend, FirebaseConfig};
pub use gist::{GistBackend, GistConfig};
pub use memory::MemoryBackend;

use async_trait::async_trait;
use serde_json::Value;

use crate::entry::Entry;
use crate::error::PersistenceError;

/// Timeout applied to remote backend requests unless configured otherwise
pub const DEFAULT_HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Durable medium behind the store
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Reads the full collection. A medium that does not exist yet is empty.
    async fn load(&self) -> Result<Vec<Entry>, PersistenceError>;

    /// Replaces the full collection. Must be all-or-nothing.
    async fn save(&self, entries: &[Entry]) -> Result<(), PersistenceError>;

    /// Whether entries need an identifier before they can be saved
    fn assigns_ids(&self) -> bool {
        false
    }
}

/// Turns a stored JSON document into entries
///
/// `null` is an empty collection. Array elements that are not objects are
/// dropped with a warning; any other top-level shape is corrupt.
pub(crate) fn entries_from_document(document: Value, source: &str) -> Result<Vec<Entry>, PersistenceError> {
    match document {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => {
            let total = items.len();
            let entries: Vec<Entry> = items.into_iter().filter_map(Entry::from_stored).collect();
            if entries.len() < total {
                tracing::warn!(
                    "Dropped {} non-object records while reading {}",
                    total - entries.len(),
                    source
                );
            }
            Ok(entries)
        }
        other => Err(PersistenceError::Corrupt(format!(
            "{} holds a JSON {} instead of an array",
            source,
            json_kind(&other)
        ))),
    }
}

/// Pretty-prints the collection with four-space indentation
pub(crate) fn encode_pretty(entries: &[Entry]) -> Result<Vec<u8>, PersistenceError> {
    use serde::Serialize;

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    entries.serialize(&mut serializer)?;
    Ok(buf)
}

/// Passes 2xx responses through; anything else becomes `PersistenceError::Status`
pub(crate) async fn check_status(
    backend: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, PersistenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PersistenceError::Status {
        backend,
        status: status.as_u16(),
        body,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Serves `router` on an ephemeral local port and returns its base URL
#[cfg(test)]
pub(crate) async fn spawn_mock(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
