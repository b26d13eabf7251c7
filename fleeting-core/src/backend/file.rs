use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{encode_pretty, entries_from_document, Backend};
use crate::entry::Entry;
use crate::error::PersistenceError;

/// Default location of the data file
pub const DEFAULT_DATA_FILE: &str = "/tmp/data.json";

/// Stores the collection as a pretty-printed JSON array in a local file
///
/// Every save rewrites the whole file through a temporary sibling that is
/// renamed into place, so readers never observe a half-written document.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data.json".to_string());
        let tmp_name = format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple());
        match self.path.parent() {
            Some(dir) => dir.join(tmp_name),
            None => PathBuf::from(tmp_name),
        }
    }
}

impl Default for FileBackend {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_FILE)
    }
}

#[async_trait]
impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self) -> Result<Vec<Entry>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("Data file {:?} does not exist yet", self.path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let document = serde_json::from_slice(&bytes)?;
        entries_from_document(document, &self.path.display().to_string())
    }

    async fn save(&self, entries: &[Entry]) -> Result<(), PersistenceError> {
        let data = encode_pretty(entries)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let tmp = self.temp_path();
        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}
