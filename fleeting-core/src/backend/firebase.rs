use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{check_status, entries_from_document, Backend, DEFAULT_HTTP_TIMEOUT};
use crate::entry::{generate_id, Entry};
use crate::error::PersistenceError;

/// Connection settings for a Firebase Realtime Database node
#[derive(Clone)]
pub struct FirebaseConfig {
    /// e.g. `https://my-project-default-rtdb.firebaseio.com`
    pub database_url: String,
    /// Database secret or ID token, sent as the `auth` query parameter
    pub auth_token: String,
    /// Node under which entries are kept (default: `entries`)
    pub path: String,
    pub timeout: Duration,
}

impl FirebaseConfig {
    pub fn new(database_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            auth_token: auth_token.into(),
            path: "entries".to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for FirebaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseConfig")
            .field("database_url", &self.database_url)
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Keeps entries as children of one Realtime Database node, keyed by entry id
///
/// Saves replace the whole node with a single `PUT`, which the database
/// applies atomically.
pub struct FirebaseBackend {
    client: reqwest::Client,
    endpoint: String,
    auth_token: String,
}

impl FirebaseBackend {
    pub fn new(config: FirebaseConfig) -> Result<Self, PersistenceError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: node_endpoint(&config.database_url, &config.path),
            auth_token: config.auth_token,
        })
    }
}

#[async_trait]
impl Backend for FirebaseBackend {
    fn name(&self) -> &'static str {
        "firebase"
    }

    async fn load(&self) -> Result<Vec<Entry>, PersistenceError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("auth", &self.auth_token)])
            .send()
            .await?;
        let node: Value = check_status("firebase", response).await?.json().await?;
        entries_from_node(node)
    }

    async fn save(&self, entries: &[Entry]) -> Result<(), PersistenceError> {
        let response = self
            .client
            .put(&self.endpoint)
            .query(&[("auth", &self.auth_token)])
            .json(&node_from_entries(entries))
            .send()
            .await?;
        check_status("firebase", response).await?;
        Ok(())
    }

    fn assigns_ids(&self) -> bool {
        true
    }
}

fn node_endpoint(database_url: &str, path: &str) -> String {
    format!(
        "{}/{}.json",
        database_url.trim_end_matches('/'),
        path.trim_matches('/')
    )
}

/// Children come back keyed by id in no particular order; arrival time restores it.
fn entries_from_node(node: Value) -> Result<Vec<Entry>, PersistenceError> {
    let entries = match node {
        Value::Object(children) => {
            let total = children.len();
            let entries: Vec<Entry> = children
                .into_iter()
                .filter_map(|(id, child)| Entry::from_stored(child).map(|e| e.with_id(id)))
                .collect();
            if entries.len() < total {
                tracing::warn!(
                    "Dropped {} non-object children while reading firebase node",
                    total - entries.len()
                );
            }
            entries
        }
        other => entries_from_document(other, "firebase node")?,
    };
    // Keyed once here so every later save writes the same child keys
    let mut entries: Vec<Entry> = entries
        .into_iter()
        .map(|e| if e.id().is_some() { e } else { e.with_id(generate_id()) })
        .collect();
    // Entries without a readable timestamp go last; they are pruned anyway.
    entries.sort_by_key(|e| (e.timestamp().is_none(), e.timestamp()));
    Ok(entries)
}

fn node_from_entries(entries: &[Entry]) -> Value {
    let mut node = Map::with_capacity(entries.len());
    for entry in entries {
        let id = entry.id().map(str::to_owned).unwrap_or_else(generate_id);
        node.insert(id, Value::Object(entry.fields().clone()));
    }
    Value::Object(node)
}
