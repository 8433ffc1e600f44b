//! Namespaced key-value store for preferences and per-email records
//!
//! Only the `get`/`put` contract matters to the engine. Two implementations
//! ship with the crate: an in-memory map and a write-through JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{AssistantError, Result};

/// Key holding the scheduling preference document
pub const SCHEDULE_PREFERENCES: &str = "schedule_preferences";
/// Key holding the background preference document
pub const BACKGROUND_PREFERENCES: &str = "background_preferences";
/// Key holding the response preference document
pub const RESPONSE_PREFERENCES: &str = "response_preferences";

/// Key of the persisted priority record for an email
pub fn priority_key(email_id: &str) -> String {
    format!("email_priority_{}", email_id)
}

/// Key of the persisted triage decision for an email
pub fn triage_key(email_id: &str) -> String {
    format!("triage_decision_{}", email_id)
}

/// Trait defining the preference/record store used by the engine
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Read the value stored under `key` in `namespace`
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>>;

    /// Write `value` under `key` in `namespace`, replacing any previous value
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<()>;
}

type Namespaces = BTreeMap<String, BTreeMap<String, Value>>;

/// Process-local store, mainly for tests and dry runs
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<Namespaces>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored in `namespace`
    pub async fn len(&self, namespace: &str) -> usize {
        self.data
            .read()
            .await
            .get(namespace)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl PreferenceStore for InMemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let data = self.data.read().await;
        Ok(data.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let mut data = self.data.write().await;
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Store persisted as a single JSON document, rewritten on every `put`
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: RwLock<Namespaces>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let data = if path.exists() {
            let json = tokio::fs::read_to_string(&path).await?;
            let data: Namespaces = serde_json::from_str(&json)?;
            info!(
                "Loaded preference store from {:?} ({} namespaces)",
                path,
                data.len()
            );
            data
        } else {
            info!("No existing preference store at {:?}, starting fresh", path);
            Namespaces::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, data: &Namespaces) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(data)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| AssistantError::StoreError(format!("writing {:?}: {}", self.path, e)))?;
        debug!("Saved preference store to {:?}", self.path);
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for JsonFileStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let data = self.data.read().await;
        Ok(data.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let mut data = self.data.write().await;
        let mut updated = data.clone();
        updated
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);

        // the map only changes once the file write has landed
        self.save(&updated).await?;
        *data = updated;
        Ok(())
    }
}
