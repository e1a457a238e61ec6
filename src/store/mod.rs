//! Configuration store: the externally owned home of the value being rendered.
//!
//! The core only ever reads. [`ConfigurationStore`] is the seam: the API endpoint
//! receives one explicitly instead of resolving the value through ambient state,
//! which is what lets tests substitute a counting double.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: process-local map; `set` is the operator's lever.
//! - [`JsonFileStore`]: a JSON object on disk, re-read on every lookup so that an
//!   edit to the file is visible on the very next request.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Name of the entry the service renders unless configured otherwise.
pub const DEFAULT_PARAMETER_NAME: &str = "/dynamic-html/string";

/// Value the entry holds when first provisioned.
pub const INITIAL_VALUE: &str = "Initial Dynamic String";

/// Errors surfaced by a [`ConfigurationStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("parameter `{name}` not found")]
    NotFound { name: String },

    #[error("parameter store unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("parameter store returned malformed data: {reason}")]
    Corrupt { reason: String },
}

/// Read access to named string values.
///
/// Implementations must not cache: every call reflects the store's current state.
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Returns the current value of `name`.
    async fn get(&self, name: &str) -> Result<String, StoreError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding a single entry.
    pub fn with_entry(name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut values = HashMap::new();
        values.insert(name.into(), value.into());
        Self {
            values: RwLock::new(values),
        }
    }

    /// A store holding [`INITIAL_VALUE`] under [`DEFAULT_PARAMETER_NAME`].
    pub fn seeded() -> Self {
        Self::with_entry(DEFAULT_PARAMETER_NAME, INITIAL_VALUE)
    }

    /// Sets `name` to `value`.
    pub async fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.values.write().await.insert(name.into(), value.into());
    }
}

#[async_trait]
impl ConfigurationStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<String, StoreError> {
        self.values
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_owned(),
            })
    }
}

/// Store backed by a JSON object file mapping parameter names to string values:
///
/// ```json
/// { "/dynamic-html/string": "Initial Dynamic String" }
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigurationStore for JsonFileStore {
    async fn get(&self, name: &str) -> Result<String, StoreError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| StoreError::Unreachable {
                reason: format!("{}: {e}", self.path.display()),
            })?;

        let values: HashMap<String, serde_json::Value> =
            serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
                reason: e.to_string(),
            })?;

        match values.get(name) {
            Some(serde_json::Value::String(value)) => Ok(value.clone()),
            Some(other) => Err(StoreError::Corrupt {
                reason: format!("`{name}` holds a non-string value: {other}"),
            }),
            None => Err(StoreError::NotFound {
                name: name.to_owned(),
            }),
        }
    }
}
