//! Process configuration read from environment variables.
//!
//! Backends that need credentials are checked here, before the listener
//! starts, so a misconfigured deployment fails at boot instead of on the
//! first request.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleeting_core::{
    Backend, ConfigError, FileBackend, FirebaseBackend, FirebaseConfig, GistBackend, GistConfig,
    MemoryBackend, PersistenceError, RegistryConfig, DEFAULT_DATA_FILE,
};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_EXPIRATION_MINUTES: u64 = 5;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Everything the server needs to start
#[derive(Debug)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub expiration_minutes: u64,
    pub backend: BackendSettings,
}

/// Which medium backs the collection
#[derive(Debug)]
pub enum BackendSettings {
    Memory,
    File(PathBuf),
    Gist(GistConfig),
    Firebase(FirebaseConfig),
}

impl Settings {
    /// Reads settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host = get("FLEETING_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_or("FLEETING_PORT", get("FLEETING_PORT"), DEFAULT_PORT)?;
        let expiration_minutes = parse_or(
            "FLEETING_EXPIRATION_MINUTES",
            get("FLEETING_EXPIRATION_MINUTES"),
            DEFAULT_EXPIRATION_MINUTES,
        )?;
        if expiration_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                var: "FLEETING_EXPIRATION_MINUTES",
                value: "0".to_string(),
            });
        }
        let timeout = Duration::from_secs(parse_or(
            "FLEETING_HTTP_TIMEOUT_SECS",
            get("FLEETING_HTTP_TIMEOUT_SECS"),
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?);

        let require = |key: &'static str| get(key).ok_or(ConfigError::MissingVar(key));

        let backend = match get("FLEETING_BACKEND")
            .unwrap_or_else(|| "file".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => BackendSettings::Memory,
            "file" => BackendSettings::File(
                get("FLEETING_DATA_FILE")
                    .unwrap_or_else(|| DEFAULT_DATA_FILE.to_string())
                    .into(),
            ),
            "gist" => {
                let mut config = GistConfig::new(require("GITHUB_TOKEN")?, require("GIST_ID")?)
                    .with_timeout(timeout);
                if let Some(filename) = get("GIST_FILENAME") {
                    config = config.with_filename(filename);
                }
                BackendSettings::Gist(config)
            }
            "firebase" => {
                let mut config = FirebaseConfig::new(
                    require("FIREBASE_DATABASE_URL")?,
                    require("FIREBASE_AUTH_TOKEN")?,
                )
                .with_timeout(timeout);
                if let Some(path) = get("FIREBASE_PATH") {
                    config = config.with_path(path);
                }
                BackendSettings::Firebase(config)
            }
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        Ok(Self {
            host,
            port,
            expiration_minutes,
            backend,
        })
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::default().with_expiration_minutes(self.expiration_minutes)
    }
}

impl BackendSettings {
    /// Builds the configured backend
    pub fn build(self) -> Result<Arc<dyn Backend>, PersistenceError> {
        Ok(match self {
            BackendSettings::Memory => Arc::new(MemoryBackend::new()),
            BackendSettings::File(path) => Arc::new(FileBackend::new(path)),
            BackendSettings::Gist(config) => Arc::new(GistBackend::new(config)?),
            BackendSettings::Firebase(config) => Arc::new(FirebaseBackend::new(config)?),
        })
    }
}

fn parse_or<T: std::str::FromStr>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.host, "127.0.0.1");
        assert_eq!(s.port, 8000);
        assert_eq!(s.expiration_minutes, 5);
        assert!(matches!(s.backend, BackendSettings::File(ref p) if p == &PathBuf::from("/tmp/data.json")));
        assert_eq!(s.registry_config().expiration_window, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides() {
        let s = settings(&[
            ("FLEETING_HOST", "0.0.0.0"),
            ("FLEETING_PORT", "9090"),
            ("FLEETING_EXPIRATION_MINUTES", "15"),
            ("FLEETING_BACKEND", "Memory"),
        ])
        .unwrap();
        assert_eq!(s.host, "0.0.0.0");
        assert_eq!(s.port, 9090);
        assert_eq!(s.expiration_minutes, 15);
        assert!(matches!(s.backend, BackendSettings::Memory));
    }

    #[test]
    fn test_invalid_numbers_fail() {
        let err = settings(&[("FLEETING_PORT", "eighty")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "FLEETING_PORT",
                value: "eighty".to_string()
            }
        );

        assert!(settings(&[("FLEETING_EXPIRATION_MINUTES", "0")]).is_err());
        assert!(settings(&[("FLEETING_HTTP_TIMEOUT_SECS", "-1")]).is_err());
    }

    #[test]
    fn test_unknown_backend_fails() {
        let err = settings(&[("FLEETING_BACKEND", "redis")]).unwrap_err();
        assert_eq!(err, ConfigError::UnknownBackend("redis".to_string()));
    }

    #[test]
    fn test_gist_requires_credentials() {
        let err = settings(&[("FLEETING_BACKEND", "gist"), ("GIST_ID", "abc")]).unwrap_err();
        assert_eq!(err, ConfigError::MissingVar("GITHUB_TOKEN"));

        let err = settings(&[("FLEETING_BACKEND", "gist"), ("GITHUB_TOKEN", "t"), ("GIST_ID", "  ")]).unwrap_err();
        assert_eq!(err, ConfigError::MissingVar("GIST_ID"));

        let s = settings(&[
            ("FLEETING_BACKEND", "gist"),
            ("GITHUB_TOKEN", "t"),
            ("GIST_ID", "abc"),
            ("GIST_FILENAME", "registry.json"),
        ])
        .unwrap();
        match s.backend {
            BackendSettings::Gist(config) => {
                assert_eq!(config.gist_id, "abc");
                assert_eq!(config.filename, "registry.json");
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_firebase_requires_credentials() {
        let err = settings(&[("FLEETING_BACKEND", "firebase")]).unwrap_err();
        assert_eq!(err, ConfigError::MissingVar("FIREBASE_DATABASE_URL"));

        let s = settings(&[
            ("FLEETING_BACKEND", "firebase"),
            ("FIREBASE_DATABASE_URL", "https://x.firebaseio.com"),
            ("FIREBASE_AUTH_TOKEN", "secret"),
            ("FLEETING_HTTP_TIMEOUT_SECS", "3"),
        ])
        .unwrap();
        match s.backend {
            BackendSettings::Firebase(config) => {
                assert_eq!(config.path, "entries");
                assert_eq!(config.timeout, Duration::from_secs(3));
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_build_backends() {
        assert_eq!(BackendSettings::Memory.build().unwrap().name(), "memory");
        assert_eq!(
            BackendSettings::File("/tmp/x.json".into()).build().unwrap().name(),
            "file"
        );
        let firebase = BackendSettings::Firebase(FirebaseConfig::new("https://x.firebaseio.com", "t"))
            .build()
            .unwrap();
        assert!(firebase.assigns_ids());
    }
}
