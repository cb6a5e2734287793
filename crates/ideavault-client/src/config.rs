//! Client configuration, loaded from RON.
//!
//! ```ron
//! (
//!     base_url: "https://vault.example.com",
//!     ideas_collection: "ideas",
//!     insert_order: by_created,
//! )
//! ```
//!
//! Every field is optional. The `IDEAVAULT_URL` environment variable overrides
//! `base_url`; command-line flags override both.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{
    BASE_URL_ENV, CONFIG_FILE, DEFAULT_BASE_URL, DEFAULT_IDEAS_COLLECTION,
    DEFAULT_USERS_COLLECTION, REQUEST_TIMEOUT,
};
use crate::sync::InsertOrder;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend root, without the `/api` suffix.
    pub base_url: String,
    pub users_collection: String,
    pub ideas_collection: String,
    pub request_timeout_secs: u64,
    pub insert_order: InsertOrder,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            users_collection: DEFAULT_USERS_COLLECTION.to_string(),
            ideas_collection: DEFAULT_IDEAS_COLLECTION.to_string(),
            request_timeout_secs: REQUEST_TIMEOUT.as_secs(),
            insert_order: InsertOrder::default(),
        }
    }
}

/// Errors from reading a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("RON parse error in {}: {source}", .path.display())]
    Ron {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

impl ClientConfig {
    /// `<config dir>/ideavault/client.ron`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ideavault").join(CONFIG_FILE))
    }

    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config = Self::from_ron(&text)
            .map_err(|source| ConfigError::Ron { path: path.to_path_buf(), source })?;
        debug!(path = %path.display(), "Loaded client config");
        Ok(config)
    }

    /// Load from the default path. A missing file yields defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Apply an override for `base_url`, as read from `IDEAVAULT_URL`.
    pub fn with_base_url_override(mut self, base_url: Option<String>) -> Self {
        if let Some(url) = base_url.filter(|url| !url.trim().is_empty()) {
            self.base_url = url;
        }
        self
    }

    /// Apply the `IDEAVAULT_URL` environment override.
    pub fn with_env(self) -> Self {
        self.with_base_url_override(std::env::var(BASE_URL_ENV).ok())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// `base_url` without trailing slashes.
    pub fn api_root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
