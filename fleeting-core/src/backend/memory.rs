use std::sync::Mutex;

use async_trait::async_trait;

use super::Backend;
use crate::entry::Entry;
use crate::error::PersistenceError;

/// Keeps the last saved collection in process memory
///
/// Nothing survives a restart. Useful when persistence is not wanted and in tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    saved: Mutex<Vec<Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with an already-populated collection
    pub fn with_entries(entries: Vec<Entry>) -> Self {
        Self {
            saved: Mutex::new(entries),
        }
    }

    /// The collection as of the last save
    pub fn saved(&self) -> Vec<Entry> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<Vec<Entry>, PersistenceError> {
        Ok(self.saved())
    }

    async fn save(&self, entries: &[Entry]) -> Result<(), PersistenceError> {
        *self.saved.lock().unwrap_or_else(|e| e.into_inner()) = entries.to_vec();
        Ok(())
    }
}
