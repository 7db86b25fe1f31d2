// Configuration loading: YAML file, defaults, environment overrides

use crate::books::{BookSearch, DEFAULT_BOOKS_URL};
use crate::store::{DocumentStore, FileStore, MemoryStore, RtdbStore};
use crate::trackers::DEFAULT_WATER_GOAL;
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    #[default]
    File,
    Rtdb,
}

impl FromStr for Backend {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "file" => Ok(Backend::File),
            "rtdb" => Ok(Backend::Rtdb),
            other => Err(eyre!("Unknown backend '{}' (expected memory, file or rtdb)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtdbConfig {
    pub url: Option<String>,
    pub auth: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RtdbConfig {
    fn default() -> Self {
        Self {
            url: None,
            auth: None,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BooksConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for BooksConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BOOKS_URL.to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    pub data_dir: Option<PathBuf>,
    pub rtdb: RtdbConfig,
    pub books: BooksConfig,
    pub water_goal_ml: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            data_dir: None,
            rtdb: RtdbConfig::default(),
            books: BooksConfig::default(),
            water_goal_ml: DEFAULT_WATER_GOAL,
        }
    }
}

impl Config {
    /// `<config_dir>/lifetrack/config.yml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lifetrack").join("config.yml"))
    }

    /// Load from an explicit file (must exist) or the default location (optional)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        Ok(config.with_env(|name| std::env::var(name).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).context(format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_yaml(&text).context(format!("Failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), backend = ?config.backend, "Loaded config");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // An empty file deserializes as null
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply environment overrides through `lookup`
    ///
    /// An unparseable `LIFETRACK_BACKEND` is ignored.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(raw) = lookup("LIFETRACK_BACKEND") {
            match raw.parse() {
                Ok(backend) => self.backend = backend,
                Err(e) => tracing::warn!(error = %e, "Ignoring LIFETRACK_BACKEND"),
            }
        }
        if let Some(url) = lookup("LIFETRACK_RTDB_URL") {
            self.rtdb.url = Some(url);
        }
        if let Some(auth) = lookup("LIFETRACK_RTDB_AUTH") {
            self.rtdb.auth = Some(auth);
        }
        if let Some(key) = lookup("GOOGLE_BOOKS_API_KEY") {
            self.books.api_key = Some(key);
        }
        self
    }

    /// Directory the file store lives in
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .map(|dir| dir.join("lifetrack"))
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    /// Create the shared store handle for the configured backend
    pub fn open_store(&self) -> Result<Arc<dyn DocumentStore>> {
        let store: Arc<dyn DocumentStore> = match self.backend {
            Backend::Memory => Arc::new(MemoryStore::new()),
            Backend::File => Arc::new(FileStore::open(self.data_dir())?),
            Backend::Rtdb => {
                let url = self
                    .rtdb
                    .url
                    .as_deref()
                    .ok_or_else(|| eyre!("rtdb backend selected but rtdb.url is not set"))?;
                Arc::new(RtdbStore::connect(
                    url,
                    self.rtdb.auth.clone(),
                    Duration::from_secs(self.rtdb.timeout_secs),
                )?)
            }
        };
        info!(backend = ?self.backend, "Opened store");
        Ok(store)
    }

    pub fn book_search(&self) -> Result<BookSearch> {
        BookSearch::new(
            &self.books.base_url,
            self.books.api_key.clone(),
            Duration::from_secs(self.books.timeout_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend, Backend::File);
        assert_eq!(config.rtdb.timeout_secs, 15);
        assert_eq!(config.books.base_url, DEFAULT_BOOKS_URL);
        assert_eq!(config.water_goal_ml, 2000);
        assert_eq!(Config::from_yaml("").unwrap(), config);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            "backend: rtdb\nrtdb:\n  url: https://demo.firebaseio.com\nwater_goal_ml: 2500\n",
        )
        .unwrap();
        assert_eq!(config.backend, Backend::Rtdb);
        assert_eq!(config.rtdb.url.as_deref(), Some("https://demo.firebaseio.com"));
        assert_eq!(config.rtdb.timeout_secs, 15);
        assert_eq!(config.books.timeout_secs, 10);
        assert_eq!(config.water_goal_ml, 2500);
    }

    #[test]
    fn test_bad_yaml_is_an_error() {
        assert!(Config::from_yaml("backend: [").is_err());
        assert!(Config::from_yaml("backend: cloud").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default().with_env(env(&[
            ("LIFETRACK_BACKEND", "Memory"),
            ("LIFETRACK_RTDB_URL", "https://x.firebaseio.com"),
            ("LIFETRACK_RTDB_AUTH", "secret"),
            ("GOOGLE_BOOKS_API_KEY", "key"),
        ]));
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.rtdb.url.as_deref(), Some("https://x.firebaseio.com"));
        assert_eq!(config.rtdb.auth.as_deref(), Some("secret"));
        assert_eq!(config.books.api_key.as_deref(), Some("key"));
    }

    #[test]
    fn test_env_ignores_bad_and_blank_values() {
        let config = Config::default().with_env(env(&[("LIFETRACK_BACKEND", "cloud"), ("GOOGLE_BOOKS_API_KEY", " ")]));
        assert_eq!(config.backend, Backend::File);
        assert_eq!(config.books.api_key, None);
    }

    #[test]
    fn test_from_file_and_missing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        fs::write(&path, "backend: memory\n").unwrap();
        assert_eq!(Config::from_file(&path).unwrap().backend, Backend::Memory);
        assert!(Config::from_file(&temp.path().join("nope.yml")).is_err());
    }

    #[test]
    fn test_open_file_store_in_data_dir() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            data_dir: Some(temp.path().to_path_buf()),
            ..Default::default()
        };
        let store = config.open_store().unwrap();
        store.write_exact(&"todolist/a".parse().unwrap(), serde_json::json!({"name": "x"})).unwrap();
        assert!(temp.path().join(".lifetrack").join("writes.jsonl").exists());
    }

    #[test]
    fn test_rtdb_requires_url() {
        let config = Config {
            backend: Backend::Rtdb,
            ..Default::default()
        };
        assert!(config.open_store().is_err());
    }
}
