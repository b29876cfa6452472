use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::storage::ProfileStorage;

pub struct JsonProfileStorage {
    file_path: PathBuf,
    cache: RwLock<BTreeMap<String, String>>,
}

impl JsonProfileStorage {
    /// Open the profile storage in `profile_dir`, loading `storage.json` if
    /// present.
    ///
    /// If the file is corrupted (invalid JSON), creates a backup at
    /// `storage.json.bak`, logs a warning, and starts empty.
    pub async fn new(profile_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&profile_dir)
            .await
            .context("Failed to create profile directory")?;

        let file_path = profile_dir.join("storage.json");

        let entries = if file_path.exists() {
            let content = tokio::fs::read_to_string(&file_path)
                .await
                .context("Failed to read storage.json")?;
            match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(
                        "storage.json is corrupted ({}), creating backup and starting empty",
                        e
                    );
                    let backup_path = profile_dir.join("storage.json.bak");
                    if let Err(backup_err) = tokio::fs::copy(&file_path, &backup_path).await {
                        tracing::error!(
                            "Failed to create backup of corrupted storage.json: {}",
                            backup_err
                        );
                    }
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            file_path,
            cache: RwLock::new(entries),
        })
    }

    /// Write to a .tmp file first, then rename over the real file.
    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let tmp_path = self.file_path.with_extension("json.tmp");

        let json =
            serde_json::to_string_pretty(entries).context("Failed to serialize profile storage")?;

        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .context("Failed to write temporary storage file")?;

        tokio::fs::rename(&tmp_path, &self.file_path)
            .await
            .context("Failed to rename temporary storage file")?;

        Ok(())
    }
}

#[async_trait]
impl ProfileStorage for JsonProfileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let cache = self.cache.read().await;
        Ok(cache.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        cache.insert(key.to_string(), value.to_string());
        self.persist(&cache).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        if cache.remove(key).is_some() {
            self.persist(&cache).await?;
        }
        Ok(())
    }
}

/// Process-local storage; nothing survives a restart.
#[derive(Default)]
pub struct MemoryProfileStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryProfileStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStorage for MemoryProfileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
