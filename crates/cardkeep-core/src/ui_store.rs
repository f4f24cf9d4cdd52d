//! Per-card UI metadata.
//!
//! A single JSON file maps card ids to the notes the UI keeps alongside a
//! card: a free-text summary, a source link and the card's resource folder.
//! The file is re-read on every operation and replaced atomically; a mutex
//! serialises read-modify-write cycles.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::fsutil;

/// Metadata for one card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiEntry {
    pub summary: String,
    pub link: String,
    /// Folder below the resources directory.
    pub resource_folder: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UiEntry {
    fn is_empty(&self) -> bool {
        self.summary.is_empty()
            && self.link.is_empty()
            && self.resource_folder.is_empty()
            && self.extra.is_empty()
    }
}

/// Partial update of a [`UiEntry`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UiEntryUpdate {
    pub summary: Option<String>,
    pub link: Option<String>,
    pub resource_folder: Option<String>,
}

type UiData = BTreeMap<String, UiEntry>;

/// The UI metadata file.
#[derive(Debug)]
pub struct UiStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl UiStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn load(&self) -> Result<UiData, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                warn!(path = %self.path.display(), error = %e, "ui data unreadable, left untouched");
                StoreError::Parse {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                }
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UiData::new()),
            Err(e) => Err(StoreError::io(&self.path, &e)),
        }
    }

    async fn save(&self, data: &UiData) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(data).map_err(|e| StoreError::InvalidDocument {
            reason: e.to_string(),
        })?;
        fsutil::write_atomic(&self.path, &bytes).await
    }

    /// Metadata for `card_id`; a default entry when none is stored.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the file cannot be read, [`StoreError::Parse`]
    /// if it is not valid UI data.
    pub async fn get(&self, card_id: &str) -> Result<UiEntry, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(card_id).unwrap_or_default())
    }

    /// Replace the metadata for `card_id`. An empty entry removes it.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the file cannot be read or written,
    /// [`StoreError::Parse`] if it is not valid UI data. A corrupt file is
    /// never overwritten.
    pub async fn set(&self, card_id: &str, entry: UiEntry) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut data = self.load().await?;
        if entry.is_empty() {
            data.remove(card_id);
        } else {
            data.insert(card_id.to_owned(), entry);
        }
        self.save(&data).await
    }

    /// Apply a partial update and return the resulting entry.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidId`] for an unsafe resource folder, or
    /// [`StoreError::Io`] or [`StoreError::Parse`].
    pub async fn update(&self, card_id: &str, update: UiEntryUpdate) -> Result<UiEntry, StoreError> {
        let _guard = self.lock.lock().await;
        let mut data = self.load().await?;
        let mut entry = data.remove(card_id).unwrap_or_default();
        if let Some(summary) = update.summary {
            entry.summary = summary;
        }
        if let Some(link) = update.link {
            entry.link = link.trim().to_owned();
        }
        if let Some(folder) = update.resource_folder {
            entry.resource_folder = fsutil::normalize_folder(&folder)?;
        }
        if !entry.is_empty() {
            data.insert(card_id.to_owned(), entry.clone());
        }
        self.save(&data).await?;
        Ok(entry)
    }

    /// Drop the metadata for `card_id`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the file cannot be read or written,
    /// [`StoreError::Parse`] if it is not valid UI data. A corrupt file is
    /// never overwritten.
    pub async fn remove(&self, card_id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut data = self.load().await?;
        let existed = data.remove(card_id).is_some();
        if existed {
            self.save(&data).await?;
        }
        Ok(existed)
    }

    /// Re-key metadata after a card moved. A no-op when `old_id` has none.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the file cannot be read or written,
    /// [`StoreError::Parse`] if it is not valid UI data. A corrupt file is
    /// never overwritten.
    pub async fn rename(&self, old_id: &str, new_id: &str) -> Result<(), StoreError> {
        if old_id == new_id {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut data = self.load().await?;
        if let Some(entry) = data.remove(old_id) {
            data.insert(new_id.to_owned(), entry);
            self.save(&data).await?;
            debug!(from = %old_id, to = %new_id, "ui metadata re-keyed");
        }
        Ok(())
    }
}
