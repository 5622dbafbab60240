//! Realm configuration
//!
//! A `RealmConfig` names a file and describes how it is opened. Every
//! realm opened on the same path inside one environment must agree on the
//! settings that shape the shared store (`read_only`, `in_memory`,
//! `schema_version`, `schema`); disagreement fails with `MismatchedConfig`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::Schema;

fn default_cache() -> bool {
    true
}

/// Configuration for opening a realm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealmConfig {
    /// File identity; realms with the same path share one store
    pub path: String,
    /// Object types stored in the file
    #[serde(default)]
    pub schema: Schema,
    /// Schema version
    #[serde(default)]
    pub schema_version: u64,
    /// Keep data only while some realm on the path is open
    #[serde(default)]
    pub in_memory: bool,
    /// Reject write transactions
    #[serde(default)]
    pub read_only: bool,
    /// Reuse one realm per (thread, path, run loop)
    #[serde(default = "default_cache")]
    pub cache: bool,
    /// Maximum number of retained snapshot versions, if bounded
    #[serde(default)]
    pub history_limit: Option<usize>,
}

impl RealmConfig {
    /// Create a config for a named file.
    pub fn new(path: impl Into<String>, schema: Schema) -> Self {
        Self {
            path: path.into(),
            schema,
            schema_version: 0,
            in_memory: false,
            read_only: false,
            cache: true,
            history_limit: None,
        }
    }

    /// Create a config for a fresh in-memory file with a unique path.
    pub fn in_memory(schema: Schema) -> Self {
        Self {
            in_memory: true,
            ..Self::new(format!("memory:{}", uuid::Uuid::new_v4()), schema)
        }
    }

    pub fn with_schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_in_memory(mut self, in_memory: bool) -> Self {
        self.in_memory = in_memory;
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// Loads a config from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read or parsed, and
    /// `Error::Schema` if the embedded schema is invalid.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Parses a config from JSON text.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: RealmConfig = serde_json::from_str(content).map_err(|e| {
            // An invalid schema surfaces through serde as a custom error.
            let message = e.to_string();
            if message.starts_with("Schema error") {
                Error::schema(message)
            } else {
                Error::config(format!("Invalid config: {}", message))
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks settings that do not depend on other open realms.
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::config("Realm path must not be empty"));
        }
        if self.history_limit == Some(0) {
            return Err(Error::config("history_limit must be at least 1"));
        }
        Ok(())
    }

    /// Checks that `other` can share this config's store.
    pub fn check_compatible(&self, other: &RealmConfig) -> Result<()> {
        if self.read_only != other.read_only {
            return Err(Error::MismatchedConfig(format!(
                "Realm at path '{}' already opened with different read permissions",
                self.path
            )));
        }
        if self.in_memory != other.in_memory {
            return Err(Error::MismatchedConfig(format!(
                "Realm at path '{}' already opened with different inMemory settings",
                self.path
            )));
        }
        if self.schema_version != other.schema_version {
            return Err(Error::MismatchedConfig(format!(
                "Realm at path '{}' already opened with different schema version",
                self.path
            )));
        }
        if self.schema != other.schema {
            return Err(Error::MismatchedConfig(format!(
                "Realm at path '{}' already opened with different schema",
                self.path
            )));
        }
        Ok(())
    }

    /// Settings for the versioned store backing this file
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            history_limit: self.history_limit,
        }
    }
}

/// Configuration for a versioned store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum number of retained versions; reader pins and the latest
    /// version are kept regardless.
    pub history_limit: Option<usize>,
}

impl StoreConfig {
    /// Unbounded retention
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Retain at most `limit` versions
    pub fn bounded(limit: usize) -> Self {
        Self {
            history_limit: Some(limit),
        }
    }
}
