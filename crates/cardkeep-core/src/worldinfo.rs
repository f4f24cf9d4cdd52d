//! World-info (lorebook) library.
//!
//! Lorebooks are JSON files below the world-info directory, holding their
//! entries under `entries` as an object keyed by uid or as an array. Saves
//! go through entry history: each changed entry's previous version is
//! recorded before the file is replaced.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{EntryHistoryError, StoreError};
use crate::fsutil;
use crate::history::{self, HistoryRecord, HistoryStore};

/// Source type used in history scope keys for standalone lorebooks.
pub const SOURCE_TYPE: &str = "worldinfo";

/// Listing metadata for one lorebook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldInfoSummary {
    pub id: String,
    pub name: String,
    pub entry_count: usize,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

/// A lorebook with its listing metadata.
#[derive(Debug, Clone, Serialize)]
pub struct WorldInfoDocument {
    pub summary: WorldInfoSummary,
    pub book: Value,
}

/// Result of [`WorldInfoStore::save`].
#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    pub summary: WorldInfoSummary,
    /// Previous entry versions written to history.
    pub history_recorded: usize,
}

fn summarize(id: &str, book: &Value, meta: Option<&std::fs::Metadata>) -> WorldInfoSummary {
    let name = book
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map_or_else(
            || {
                Path::new(id)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            },
            str::to_owned,
        );
    WorldInfoSummary {
        id: id.to_owned(),
        name,
        entry_count: history::entries(book).len(),
        modified: meta
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_default(),
        size: meta.map_or(0, std::fs::Metadata::len),
    }
}

fn parse_book(path: &Path, bytes: &[u8]) -> Result<Value, StoreError> {
    let book: Value = serde_json::from_slice(bytes).map_err(|e| StoreError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    if !(book.is_object() || book.is_array()) {
        return Err(StoreError::Parse {
            path: path.display().to_string(),
            reason: "lorebook must be a JSON object or array".to_owned(),
        });
    }
    Ok(book)
}

/// Lorebooks below one directory.
#[derive(Clone)]
pub struct WorldInfoStore {
    root: PathBuf,
    trash: PathBuf,
    history: Option<(Arc<HistoryStore>, usize)>,
}

impl std::fmt::Debug for WorldInfoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldInfoStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl WorldInfoStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, trash: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            trash: trash.into(),
            history: None,
        }
    }

    /// Record entry history on save, keeping `limit` versions per entry.
    #[must_use]
    pub fn with_history(mut self, history: Arc<HistoryStore>, limit: usize) -> Self {
        self.history = Some((history, limit));
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, id: &str) -> Result<(String, PathBuf), StoreError> {
        let id = fsutil::normalize_json_id(id)?;
        let path = fsutil::resolve(&self.root, &id);
        Ok((id, path))
    }

    /// History scope of a lorebook file.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidId`] for a malformed id.
    pub fn scope_key(&self, id: &str) -> Result<String, StoreError> {
        let (id, path) = self.path_of(id)?;
        Ok(history::build_scope_key(SOURCE_TYPE, &id, Some(&path)))
    }

    /// All lorebooks, optionally filtered by a case-insensitive substring of
    /// name or id, sorted by name.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the scan task fails.
    pub async fn list(&self, search: Option<&str>) -> Result<Vec<WorldInfoSummary>, StoreError> {
        let root = self.root.clone();
        let mut items = tokio::task::spawn_blocking(move || {
            fsutil::walk_files(&root, "json")
                .into_iter()
                .filter_map(|path| {
                    let id = fsutil::relative_id(&root, &path);
                    let book = std::fs::read(&path)
                        .map_err(|e| StoreError::io(&path, &e))
                        .and_then(|bytes| parse_book(&path, &bytes));
                    match book {
                        Ok(book) => {
                            let meta = std::fs::metadata(&path).ok();
                            Some(summarize(&id, &book, meta.as_ref()))
                        }
                        Err(e) => {
                            warn!(error = %e, "skipping invalid lorebook");
                            None
                        }
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| StoreError::Io {
            path: self.root.display().to_string(),
            reason: format!("blocking task failed: {e}"),
        })?;

        if let Some(needle) = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()) {
            items.retain(|b| {
                b.name.to_lowercase().contains(&needle) || b.id.to_lowercase().contains(&needle)
            });
        }
        items.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(items)
    }

    async fn read_book(id: &str, path: &Path) -> Result<Value, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => parse_book(path, &bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                kind: "lorebook",
                id: id.to_owned(),
            }),
            Err(e) => Err(StoreError::io(path, &e)),
        }
    }

    /// Read one lorebook.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidId`], [`StoreError::NotFound`],
    /// [`StoreError::Parse`] or [`StoreError::Io`].
    pub async fn get(&self, id: &str) -> Result<WorldInfoDocument, StoreError> {
        let (id, path) = self.path_of(id)?;
        let book = Self::read_book(&id, &path).await?;
        let meta = tokio::fs::metadata(&path).await.ok();
        Ok(WorldInfoDocument {
            summary: summarize(&id, &book, meta.as_ref()),
            book,
        })
    }

    /// Create an empty lorebook named `name`. Returns its id.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidDocument`] for an empty name, or
    /// [`StoreError::Io`].
    pub async fn create(&self, name: &str) -> Result<String, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidDocument {
                reason: "lorebook name must not be empty".to_owned(),
            });
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, &e))?;
        let file_name = format!("{}.json", fsutil::sanitize_file_name(name));
        let path = fsutil::unique_path(&self.root, &file_name);
        let book = json!({ "name": name, "entries": {} });
        let bytes = serde_json::to_vec_pretty(&book).map_err(|e| StoreError::InvalidDocument {
            reason: e.to_string(),
        })?;
        fsutil::write_atomic(&path, &bytes).await?;

        let id = fsutil::relative_id(&self.root, &path);
        info!(id = %id, "lorebook created");
        Ok(id)
    }

    /// Replace a lorebook, recording previous versions of changed entries.
    ///
    /// Every entry is given a stable uid before comparing. History failures
    /// are logged and do not block the save.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the lorebook does not exist,
    /// [`StoreError::InvalidDocument`] if `book` is not an object or array.
    pub async fn save(&self, id: &str, mut book: Value) -> Result<SaveOutcome, StoreError> {
        if !(book.is_object() || book.is_array()) {
            return Err(StoreError::InvalidDocument {
                reason: "lorebook must be a JSON object or array".to_owned(),
            });
        }
        let (id, path) = self.path_of(id)?;
        let old = Self::read_book(&id, &path).await?;

        history::ensure_entry_uids(&mut book);

        let mut history_recorded = 0;
        if let Some((store, limit)) = &self.history {
            let records = history::collect_previous_versions(&old, &book);
            if !records.is_empty() {
                let scope = history::build_scope_key(SOURCE_TYPE, &id, Some(&path));
                match store.append(&scope, records, *limit).await {
                    Ok(n) => history_recorded = n,
                    Err(e) => warn!(id = %id, error = %e, "failed to record entry history"),
                }
            }
        }

        let bytes = serde_json::to_vec_pretty(&book).map_err(|e| StoreError::InvalidDocument {
            reason: e.to_string(),
        })?;
        fsutil::write_atomic(&path, &bytes).await?;
        debug!(id = %id, history_recorded, "lorebook saved");

        let meta = tokio::fs::metadata(&path).await.ok();
        Ok(SaveOutcome {
            summary: summarize(&id, &book, meta.as_ref()),
            history_recorded,
        })
    }

    /// Move a lorebook to the trash.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] or [`StoreError::Io`].
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let (id, path) = self.path_of(id)?;
        if !path.is_file() {
            return Err(StoreError::NotFound {
                kind: "lorebook",
                id,
            });
        }
        let trash = self.trash.clone();
        tokio::task::spawn_blocking(move || fsutil::move_to_trash(&path, &trash))
            .await
            .map_err(|e| StoreError::Io {
                path: self.root.display().to_string(),
                reason: format!("blocking task failed: {e}"),
            })??;
        info!(id = %id, "lorebook moved to trash");
        Ok(())
    }

    /// Stored versions of one entry, newest first. Empty when no history
    /// store is attached.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidId`] for a malformed id, or the history error.
    pub async fn entry_history(
        &self,
        id: &str,
        entry_uid: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryRecord>, EntryHistoryError> {
        let scope = self.scope_key(id)?;
        match &self.history {
            Some((store, _)) => Ok(store.list(&scope, entry_uid, limit).await?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cardkeep_storage::MemoryBackend;

    fn fixture() -> (tempfile::TempDir, WorldInfoStore) {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(HistoryStore::new(Arc::new(MemoryBackend::new())));
        let store = WorldInfoStore::new(dir.path().join("lorebooks"), dir.path().join("trash"))
            .with_history(history, 3);
        (dir, store)
    }

    #[tokio::test]
    async fn create_list_get() {
        let (_dir, store) = fixture();
        let id = store.create("Kingdom Lore").await.unwrap();
        assert_eq!(id, "Kingdom_Lore.json");
        assert_eq!(store.create("Kingdom Lore").await.unwrap(), "Kingdom_Lore_1.json");
        std::fs::write(store.root().join("bad.json"), b"42").unwrap();

        let all = store.list(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "Kingdom Lore");
        assert_eq!(all[0].entry_count, 0);

        assert_eq!(store.list(Some("_1")).await.unwrap().len(), 1);
        assert!(store.list(Some("dragons")).await.unwrap().is_empty());

        let doc = store.get(&id).await.unwrap();
        assert_eq!(doc.book["entries"], json!({}));
        assert!(store.create("   ").await.is_err());
    }

    #[tokio::test]
    async fn save_assigns_uids_and_records_history() {
        let (_dir, store) = fixture();
        let id = store.create("Lore").await.unwrap();

        let v1 = json!({"name": "Lore", "entries": {"0": {"uid": 0, "content": "first"}}});
        let out = store.save(&id, v1).await.unwrap();
        assert_eq!(out.history_recorded, 0);
        assert_eq!(out.summary.entry_count, 1);

        let saved = store.get(&id).await.unwrap().book;
        let uid = saved["entries"]["0"][history::ENTRY_UID_FIELD]
            .as_str()
            .unwrap()
            .to_owned();

        let mut v2 = saved.clone();
        v2["entries"]["0"]["content"] = json!("second");
        assert_eq!(store.save(&id, v2.clone()).await.unwrap().history_recorded, 1);
        // Saving identical content records nothing.
        assert_eq!(store.save(&id, v2.clone()).await.unwrap().history_recorded, 0);

        let mut v3 = v2;
        v3["entries"]["0"]["content"] = json!("third");
        store.save(&id, v3).await.unwrap();

        let records = store.entry_history(&id, &uid, None).await.unwrap();
        let contents: Vec<&str> = records
            .iter()
            .map(|r| r.snapshot["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn save_requires_existing_book() {
        let (_dir, store) = fixture();
        assert!(matches!(
            store.save("ghost.json", json!({"entries": {}})).await,
            Err(StoreError::NotFound { .. })
        ));
        let id = store.create("Lore").await.unwrap();
        assert!(matches!(
            store.save(&id, json!("text")).await,
            Err(StoreError::InvalidDocument { .. })
        ));
    }

    #[tokio::test]
    async fn delete_moves_to_trash() {
        let (dir, store) = fixture();
        let id = store.create("Lore").await.unwrap();
        store.delete(&id).await.unwrap();
        assert!(store.list(None).await.unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("trash")).unwrap().count(), 1);
        assert!(matches!(store.delete(&id).await, Err(StoreError::NotFound { .. })));
    }
}
