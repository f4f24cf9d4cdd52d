//! Per-card resource folders.
//!
//! Each card may own a folder below the resources directory for images,
//! extra lorebooks and other attachments. The folder name is recorded in
//! the card's UI metadata. Uploaded JSON that looks like a lorebook lands in
//! a `lorebooks/` sub-folder.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::StoreError;
use crate::fsutil;
use crate::ui_store::UiStore;

/// Sub-folder receiving uploaded lorebooks.
pub const LOREBOOK_SUBDIR: &str = "lorebooks";

/// One file in a resource folder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceFile {
    /// Path relative to the card's resource folder.
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_lorebook: bool,
}

/// Contents of a card's resource folder.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceListing {
    /// Folder below the resources directory, `None` when unassigned.
    pub folder: Option<String>,
    pub files: Vec<ResourceFile>,
}

/// Where an upload was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub filename: String,
    /// `lorebooks` or empty for the folder root.
    pub subdir: String,
    pub is_lorebook: bool,
}

/// Whether a JSON upload looks like a lorebook: an object with `entries`
/// or `keys`, or an array whose first element has `keys`.
#[must_use]
pub fn looks_like_lorebook(bytes: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(obj)) => obj.contains_key("entries") || obj.contains_key("keys"),
        Ok(Value::Array(items)) => items
            .first()
            .and_then(Value::as_object)
            .is_some_and(|first| first.contains_key("keys")),
        _ => false,
    }
}

/// Resource folders below one directory.
#[derive(Debug, Clone)]
pub struct ResourceStore {
    root: PathBuf,
    trash: PathBuf,
    ui: Arc<UiStore>,
}

impl ResourceStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, trash: impl Into<PathBuf>, ui: Arc<UiStore>) -> Self {
        Self {
            root: root.into(),
            trash: trash.into(),
            ui,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a file below the resources directory.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidId`] for paths escaping the directory.
    pub fn resolve_file(&self, path: &str) -> Result<PathBuf, StoreError> {
        let path = fsutil::normalize_id(path)?;
        Ok(fsutil::resolve(&self.root, &path))
    }

    async fn folder_of(&self, card_id: &str) -> Result<Option<String>, StoreError> {
        let folder = self.ui.get(card_id).await?.resource_folder;
        if folder.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fsutil::normalize_id(&folder)?))
        }
    }

    /// Make sure `card_id` has a resource folder, creating one named after
    /// the card if needed. Returns the folder id.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the folder or metadata cannot be written.
    pub async fn ensure_folder(&self, card_id: &str, card_name: &str) -> Result<String, StoreError> {
        let folder = if let Some(existing) = self.folder_of(card_id).await? {
            existing
        } else {
            let stem = Path::new(card_id)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let base = if card_name.trim().is_empty() { stem.as_str() } else { card_name };
            let folder = fsutil::sanitize_file_name(base);
            let mut entry = self.ui.get(card_id).await?;
            entry.resource_folder.clone_from(&folder);
            self.ui.set(card_id, entry).await?;
            info!(card = %card_id, folder = %folder, "resource folder assigned");
            folder
        };

        let dir = fsutil::resolve(&self.root, &folder);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, &e))?;
        Ok(folder)
    }

    /// Files in the card's resource folder, recursively, sorted by name.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the scan fails.
    pub async fn list(&self, card_id: &str) -> Result<ResourceListing, StoreError> {
        let Some(folder) = self.folder_of(card_id).await? else {
            return Ok(ResourceListing {
                folder: None,
                files: Vec::new(),
            });
        };
        let dir = fsutil::resolve(&self.root, &folder);
        let files = tokio::task::spawn_blocking(move || scan_folder(&dir))
            .await
            .map_err(|e| StoreError::Io {
                path: self.root.display().to_string(),
                reason: format!("blocking task failed: {e}"),
            })?;
        Ok(ResourceListing {
            folder: Some(folder),
            files,
        })
    }

    /// Store an uploaded file in the card's resource folder.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the card has no resource folder, or
    /// [`StoreError::Io`].
    pub async fn upload(
        &self,
        card_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadOutcome, StoreError> {
        let folder = self
            .folder_of(card_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "resource folder",
                id: card_id.to_owned(),
            })?;

        let file_name = fsutil::sanitize_file_name(file_name);
        let is_lorebook =
            fsutil::has_extension(Path::new(&file_name), "json") && looks_like_lorebook(bytes);
        let subdir = if is_lorebook { LOREBOOK_SUBDIR } else { "" };

        let mut dir = fsutil::resolve(&self.root, &folder);
        if !subdir.is_empty() {
            dir.push(subdir);
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, &e))?;
        let path = fsutil::unique_path(&dir, &file_name);
        fsutil::write_atomic(&path, bytes).await?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(card = %card_id, file = %filename, is_lorebook, "resource uploaded");
        Ok(UploadOutcome {
            filename,
            subdir: subdir.to_owned(),
            is_lorebook,
        })
    }

    /// Move a file from the card's resource folder to the trash.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidId`] for traversal attempts,
    /// [`StoreError::NotFound`] if the folder or file is missing.
    pub async fn delete(&self, card_id: &str, file_name: &str) -> Result<(), StoreError> {
        let folder = self
            .folder_of(card_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "resource folder",
                id: card_id.to_owned(),
            })?;
        let rel = fsutil::normalize_id(file_name)?;
        let path = fsutil::resolve(&fsutil::resolve(&self.root, &folder), &rel);
        if !path.is_file() {
            return Err(StoreError::NotFound {
                kind: "resource",
                id: rel,
            });
        }
        let trash = self.trash.clone();
        tokio::task::spawn_blocking(move || fsutil::move_to_trash(&path, &trash))
            .await
            .map_err(|e| StoreError::Io {
                path: self.root.display().to_string(),
                reason: format!("blocking task failed: {e}"),
            })??;
        info!(card = %card_id, file = %rel, "resource moved to trash");
        Ok(())
    }
}

fn scan_folder(dir: &Path) -> Vec<ResourceFile> {
    let mut files: Vec<ResourceFile> = fsutil::visible_entries(dir)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            let name = fsutil::relative_id(dir, e.path());
            Some(ResourceFile {
                is_lorebook: name.starts_with(&format!("{LOREBOOK_SUBDIR}/")),
                name,
                size: meta.len(),
                modified: meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_default(),
            })
        })
        .collect();
    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}
