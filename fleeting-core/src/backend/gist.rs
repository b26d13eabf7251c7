use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde_json::{json, Value};

use super::{check_status, encode_pretty, entries_from_document, Backend, DEFAULT_HTTP_TIMEOUT};
use crate::entry::Entry;
use crate::error::PersistenceError;

const GITHUB_API: &str = "https://api.github.com";

/// Connection settings for a GitHub Gist used as the data file
#[derive(Clone)]
pub struct GistConfig {
    pub token: String,
    pub gist_id: String,
    /// File inside the gist holding the JSON array (default: `data.json`)
    pub filename: String,
    pub timeout: Duration,
    pub api_base: String,
}

impl GistConfig {
    pub fn new(token: impl Into<String>, gist_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            gist_id: gist_id.into(),
            filename: "data.json".to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
            api_base: GITHUB_API.to_string(),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

// Keeps the token out of logs.
impl std::fmt::Debug for GistConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GistConfig")
            .field("gist_id", &self.gist_id)
            .field("filename", &self.filename)
            .field("timeout", &self.timeout)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

/// Reads and rewrites one file of a GitHub Gist
pub struct GistBackend {
    client: reqwest::Client,
    url: String,
    filename: String,
}

impl GistBackend {
    pub fn new(config: GistConfig) -> Result<Self, PersistenceError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| PersistenceError::Corrupt("GitHub token is not a valid header value".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("fleeting-registry"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/gists/{}", config.api_base.trim_end_matches('/'), config.gist_id),
            filename: config.filename,
        })
    }

    async fn fetch_raw(&self, raw_url: &str) -> Result<String, PersistenceError> {
        let response = self.client.get(raw_url).send().await?;
        let response = check_status("gist", response).await?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Backend for GistBackend {
    fn name(&self) -> &'static str {
        "gist"
    }

    async fn load(&self) -> Result<Vec<Entry>, PersistenceError> {
        let response = self.client.get(&self.url).send().await?;
        let gist: Value = check_status("gist", response).await?.json().await?;

        let content = match gist_file(&gist, &self.filename) {
            GistFile::Missing => return Ok(Vec::new()),
            GistFile::Inline(content) => content,
            GistFile::Truncated(raw_url) => self.fetch_raw(&raw_url).await?,
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let document = serde_json::from_str(&content)?;
        entries_from_document(document, &format!("gist file {}", self.filename))
    }

    async fn save(&self, entries: &[Entry]) -> Result<(), PersistenceError> {
        let content = String::from_utf8(encode_pretty(entries)?)
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
        let body = patch_body(&self.filename, content);

        let response = self.client.patch(&self.url).json(&body).send().await?;
        check_status("gist", response).await?;
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum GistFile {
    Missing,
    Inline(String),
    /// GitHub truncates large files in the gist listing; the raw URL has the rest
    Truncated(String),
}

fn gist_file(gist: &Value, filename: &str) -> GistFile {
    let Some(file) = gist.get("files").and_then(|files| files.get(filename)) else {
        return GistFile::Missing;
    };
    let truncated = file.get("truncated").and_then(Value::as_bool).unwrap_or(false);
    let raw_url = file.get("raw_url").and_then(Value::as_str);
    match (truncated, raw_url) {
        (true, Some(url)) => GistFile::Truncated(url.to_string()),
        _ => GistFile::Inline(
            file.get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
    }
}

fn patch_body(filename: &str, content: String) -> Value {
    json!({ "files": { filename: { "content": content } } })
}
