//! Character card library.
//!
//! Cards are JSON files below the cards directory, either in the V2/V3
//! layout (fields under a `data` object) or the flat V1 layout. A card's id
//! is its path relative to the cards directory with `/` separators, e.g.
//! `fantasy/Alice.json`. An image with the same stem next to the card is
//! its sidecar image and travels with it on move and delete.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::fsutil;
use crate::history::{self, HistoryStore};

/// Extensions tried for a sidecar image, in order.
pub const SIDECAR_IMAGE_EXTENSIONS: [&str; 5] = ["png", "webp", "jpg", "jpeg", "gif"];

const MAX_PAGE_SIZE: usize = 500;
const DEFAULT_PAGE_SIZE: usize = 50;

/// Listing metadata for one card.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardSummary {
    pub id: String,
    pub name: String,
    pub creator: String,
    pub tags: Vec<String>,
    pub favorite: bool,
    /// Folder id, empty for the root.
    pub folder: String,
    /// The card's `spec` field, e.g. `chara_card_v2`.
    pub spec: Option<String>,
    /// Id of the sidecar image, relative to the cards directory.
    pub image: Option<String>,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

/// Sort order for [`CardStore::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardSort {
    #[default]
    Name,
    Modified,
}

/// Filters and paging for [`CardStore::list`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CardQuery {
    /// Case-insensitive substring over name, creator, tags and id.
    pub search: Option<String>,
    /// Exact tag, ignoring case.
    pub tag: Option<String>,
    /// Restrict to a folder and its sub-folders.
    pub folder: Option<String>,
    pub favorites_only: bool,
    pub sort: CardSort,
    /// 1-based page number.
    pub page: usize,
    /// `0` selects the default page size.
    pub page_size: usize,
}

/// One page of cards.
#[derive(Debug, Clone, Serialize)]
pub struct CardPage {
    pub items: Vec<CardSummary>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// A card with its listing metadata.
#[derive(Debug, Clone, Serialize)]
pub struct CardDocument {
    pub summary: CardSummary,
    pub card: Value,
}

/// Tag and favorite changes applied by [`CardStore::modify_attributes`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AttributeChange {
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    pub favorite: Option<bool>,
}

/// The object holding a card's fields: `data` for V2/V3, the root for V1.
fn card_fields(card: &Value) -> Option<&Map<String, Value>> {
    let root = card.as_object()?;
    match root.get("data") {
        Some(Value::Object(data)) => Some(data),
        _ => Some(root),
    }
}

fn is_v1(card: &Value) -> bool {
    !matches!(card.get("data"), Some(Value::Object(_)))
}

fn str_field(fields: &Map<String, Value>, key: &str) -> String {
    fields
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_owned()
}

/// A card's display name.
#[must_use]
pub fn card_name(card: &Value) -> String {
    let from_fields = card_fields(card).map(|f| str_field(f, "name")).unwrap_or_default();
    if from_fields.is_empty() {
        card.get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_owned()
    } else {
        from_fields
    }
}

/// A card's tags, trimmed, empty ones dropped.
#[must_use]
pub fn card_tags(card: &Value) -> Vec<String> {
    card_fields(card)
        .and_then(|f| f.get("tags"))
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Whether a card is marked favorite.
#[must_use]
pub fn card_favorite(card: &Value) -> bool {
    let ext_fav = card_fields(card)
        .and_then(|f| f.get("extensions"))
        .and_then(|e| e.get("fav"))
        .and_then(Value::as_bool);
    ext_fav
        .or_else(|| card.get("fav").and_then(Value::as_bool))
        .unwrap_or(false)
}

fn set_tags(card: &mut Value, tags: &[String]) {
    let list = Value::Array(tags.iter().cloned().map(Value::String).collect());
    let v1 = is_v1(card);
    let Some(root) = card.as_object_mut() else {
        return;
    };
    if !v1 {
        if let Some(Value::Object(data)) = root.get_mut("data") {
            data.insert("tags".to_owned(), list.clone());
        }
        // Mirror into the V1 compatibility field when the card carries one.
        if root.contains_key("tags") {
            root.insert("tags".to_owned(), list);
        }
    } else {
        root.insert("tags".to_owned(), list);
    }
}

fn set_favorite(card: &mut Value, favorite: bool) {
    let v1 = is_v1(card);
    let Some(root) = card.as_object_mut() else {
        return;
    };
    if v1 {
        root.insert("fav".to_owned(), Value::Bool(favorite));
    }
    let fields = if v1 {
        root
    } else {
        match root.get_mut("data") {
            Some(Value::Object(data)) => data,
            _ => return,
        }
    };
    let extensions = fields
        .entry("extensions")
        .or_insert_with(|| Value::Object(Map::new()));
    if !extensions.is_object() {
        *extensions = Value::Object(Map::new());
    }
    if let Value::Object(ext) = extensions {
        ext.insert("fav".to_owned(), Value::Bool(favorite));
    }
}

/// Remove tags from `current`, then append `add`. Both removal and
/// de-duplication ignore case; the first spelling seen is kept.
#[must_use]
pub fn apply_tag_change(current: &[String], add: &[String], remove: &[String]) -> Vec<String> {
    let removed: Vec<String> = remove.iter().map(|t| t.trim().to_lowercase()).collect();
    let kept = current
        .iter()
        .map(|t| t.trim())
        .filter(|t| !removed.contains(&t.to_lowercase()));
    let mut out: Vec<String> = Vec::new();
    for tag in kept.chain(add.iter().map(|t| t.trim())) {
        if tag.is_empty() {
            continue;
        }
        let lower = tag.to_lowercase();
        if !out.iter().any(|t| t.to_lowercase() == lower) {
            out.push(tag.to_owned());
        }
    }
    out
}

/// The sidecar image of a card file, if one exists.
#[must_use]
pub fn find_sidecar_image(card_path: &Path) -> Option<PathBuf> {
    SIDECAR_IMAGE_EXTENSIONS
        .iter()
        .map(|ext| card_path.with_extension(ext))
        .find(|p| p.is_file())
}

fn modified_utc(meta: Option<&std::fs::Metadata>) -> DateTime<Utc> {
    meta.and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from)
        .unwrap_or_default()
}

fn parse_card(path: &Path, bytes: &[u8]) -> Result<Value, StoreError> {
    let card: Value = serde_json::from_slice(bytes).map_err(|e| StoreError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    if !card.is_object() {
        return Err(StoreError::Parse {
            path: path.display().to_string(),
            reason: "card is not a JSON object".to_owned(),
        });
    }
    Ok(card)
}

fn folder_of(id: &str) -> String {
    id.rsplit_once('/')
        .map(|(folder, _)| folder.to_owned())
        .unwrap_or_default()
}

fn file_name_of(id: &str) -> &str {
    id.rsplit_once('/').map_or(id, |(_, name)| name)
}

fn task_err(root: &Path, e: &tokio::task::JoinError) -> StoreError {
    StoreError::Io {
        path: root.display().to_string(),
        reason: format!("blocking task failed: {e}"),
    }
}

/// Cards below one directory.
#[derive(Clone)]
pub struct CardStore {
    root: PathBuf,
    trash: PathBuf,
    history: Option<(Arc<HistoryStore>, usize)>,
}

impl std::fmt::Debug for CardStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardStore")
            .field("root", &self.root)
            .field("trash", &self.trash)
            .finish_non_exhaustive()
    }
}

impl CardStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, trash: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            trash: trash.into(),
            history: None,
        }
    }

    /// Record embedded lorebook history on update, keeping `limit` versions
    /// per entry.
    #[must_use]
    pub fn with_history(mut self, history: Arc<HistoryStore>, limit: usize) -> Self {
        self.history = Some((history, limit));
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a card id after validation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidId`] for ids that are not safe relative
    /// `.json` paths.
    pub fn path_of(&self, id: &str) -> Result<(String, PathBuf), StoreError> {
        let id = fsutil::normalize_json_id(id)?;
        let path = fsutil::resolve(&self.root, &id);
        Ok((id, path))
    }

    fn summarize(&self, id: &str, path: &Path, card: &Value, meta: Option<&std::fs::Metadata>) -> CardSummary {
        let fields = card_fields(card);
        let image = find_sidecar_image(path).map(|p| fsutil::relative_id(&self.root, &p));
        CardSummary {
            id: id.to_owned(),
            name: {
                let name = card_name(card);
                if name.is_empty() {
                    Path::new(file_name_of(id))
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default()
                } else {
                    name
                }
            },
            creator: fields.map(|f| str_field(f, "creator")).unwrap_or_default(),
            tags: card_tags(card),
            favorite: card_favorite(card),
            folder: folder_of(id),
            spec: card.get("spec").and_then(Value::as_str).map(str::to_owned),
            image,
            modified: modified_utc(meta),
            size: meta.map_or(0, std::fs::Metadata::len),
        }
    }

    /// Scan the library, filter, sort and page.
    ///
    /// Files that are not valid card JSON are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidId`] for a malformed folder filter.
    pub async fn list(&self, query: CardQuery) -> Result<CardPage, StoreError> {
        let folder = match query.folder.as_deref() {
            Some(f) => Some(fsutil::normalize_folder(f)?),
            None => None,
        };
        let store = self.clone();
        let mut items = tokio::task::spawn_blocking(move || store.scan())
            .await
            .map_err(|e| task_err(&self.root, &e))?;

        let search = query
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let tag = query
            .tag
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());

        items.retain(|card| {
            if query.favorites_only && !card.favorite {
                return false;
            }
            if let Some(folder) = folder.as_deref().filter(|f| !f.is_empty()) {
                if card.folder != folder && !card.folder.starts_with(&format!("{folder}/")) {
                    return false;
                }
            }
            if let Some(tag) = &tag {
                if !card.tags.iter().any(|t| t.to_lowercase() == *tag) {
                    return false;
                }
            }
            if let Some(search) = &search {
                let hit = card.name.to_lowercase().contains(search)
                    || card.creator.to_lowercase().contains(search)
                    || card.id.to_lowercase().contains(search)
                    || card.tags.iter().any(|t| t.to_lowercase().contains(search));
                if !hit {
                    return false;
                }
            }
            true
        });

        match query.sort {
            CardSort::Name => items.sort_by(|a, b| {
                a.name
                    .to_lowercase()
                    .cmp(&b.name.to_lowercase())
                    .then_with(|| a.id.cmp(&b.id))
            }),
            CardSort::Modified => {
                items.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.id.cmp(&b.id)));
            }
        }

        let total = items.len();
        let page_size = match query.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        let page = query.page.max(1);
        let items = items
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(CardPage {
            items,
            total,
            page,
            page_size,
        })
    }

    fn scan(&self) -> Vec<CardSummary> {
        fsutil::walk_files(&self.root, "json")
            .into_iter()
            .filter_map(|path| {
                let id = fsutil::relative_id(&self.root, &path);
                let bytes = match std::fs::read(&path) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable card");
                        return None;
                    }
                };
                let card = match parse_card(&path, &bytes) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "skipping invalid card");
                        return None;
                    }
                };
                let meta = std::fs::metadata(&path).ok();
                Some(self.summarize(&id, &path, &card, meta.as_ref()))
            })
            .collect()
    }

    /// Read one card.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidId`], [`StoreError::NotFound`],
    /// [`StoreError::Parse`] or [`StoreError::Io`].
    pub async fn get(&self, id: &str) -> Result<CardDocument, StoreError> {
        let (id, path) = self.path_of(id)?;
        let card = self.read_card(&id, &path).await?;
        let meta = tokio::fs::metadata(&path).await.ok();
        Ok(CardDocument {
            summary: self.summarize(&id, &path, &card, meta.as_ref()),
            card,
        })
    }

    async fn read_card(&self, id: &str, path: &Path) -> Result<Value, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    kind: "card",
                    id: id.to_owned(),
                });
            }
            Err(e) => return Err(StoreError::io(path, &e)),
        };
        parse_card(path, &bytes)
    }

    async fn write_card(path: &Path, card: &Value) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(card).map_err(|e| StoreError::InvalidDocument {
            reason: e.to_string(),
        })?;
        fsutil::write_atomic(path, &bytes).await
    }

    /// Create a card in `folder`, naming the file after the card.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidDocument`] if `card` is not an object,
    /// [`StoreError::InvalidId`] for a bad folder, or [`StoreError::Io`].
    pub async fn create(&self, folder: &str, card: Value) -> Result<String, StoreError> {
        if !card.is_object() {
            return Err(StoreError::InvalidDocument {
                reason: "card must be a JSON object".to_owned(),
            });
        }
        let folder = fsutil::normalize_folder(folder)?;
        let dir = if folder.is_empty() {
            self.root.clone()
        } else {
            fsutil::resolve(&self.root, &folder)
        };
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, &e))?;

        let name = card_name(&card);
        let stem = fsutil::sanitize_file_name(if name.is_empty() { "card" } else { &name });
        let path = fsutil::unique_path(&dir, &format!("{stem}.json"));
        Self::write_card(&path, &card).await?;

        let id = fsutil::relative_id(&self.root, &path);
        info!(id = %id, "card created");
        Ok(id)
    }

    /// Replace a card's content.
    ///
    /// When history is attached, entries of the embedded lorebook
    /// (`data.character_book`) get stable uids and their previous versions
    /// are recorded.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the card does not exist,
    /// [`StoreError::InvalidDocument`] if `card` is not an object.
    pub async fn update(&self, id: &str, mut card: Value) -> Result<CardSummary, StoreError> {
        if !card.is_object() {
            return Err(StoreError::InvalidDocument {
                reason: "card must be a JSON object".to_owned(),
            });
        }
        let (id, path) = self.path_of(id)?;
        let old = self.read_card(&id, &path).await?;

        if let Some((history, limit)) = &self.history {
            if let Some(book) = card.pointer_mut("/data/character_book") {
                history::ensure_entry_uids(book);
            }
            if let (Some(old_book), Some(new_book)) = (
                old.pointer("/data/character_book"),
                card.pointer("/data/character_book"),
            ) {
                let records = history::collect_previous_versions(old_book, new_book);
                if !records.is_empty() {
                    let scope = history::build_scope_key("card", &id, Some(&path));
                    if let Err(e) = history.append(&scope, records, *limit).await {
                        warn!(id = %id, error = %e, "failed to record embedded lorebook history");
                    }
                }
            }
        }

        Self::write_card(&path, &card).await?;
        debug!(id = %id, "card updated");
        let meta = tokio::fs::metadata(&path).await.ok();
        Ok(self.summarize(&id, &path, &card, meta.as_ref()))
    }

    /// Add or remove tags and set the favorite flag.
    ///
    /// # Errors
    ///
    /// Same as [`CardStore::get`], plus [`StoreError::Io`] on write.
    pub async fn modify_attributes(
        &self,
        id: &str,
        change: &AttributeChange,
    ) -> Result<CardSummary, StoreError> {
        let (id, path) = self.path_of(id)?;
        let mut card = self.read_card(&id, &path).await?;

        if !change.add_tags.is_empty() || !change.remove_tags.is_empty() {
            let tags = apply_tag_change(&card_tags(&card), &change.add_tags, &change.remove_tags);
            set_tags(&mut card, &tags);
        }
        if let Some(favorite) = change.favorite {
            set_favorite(&mut card, favorite);
        }

        Self::write_card(&path, &card).await?;
        let meta = tokio::fs::metadata(&path).await.ok();
        Ok(self.summarize(&id, &path, &card, meta.as_ref()))
    }

    /// Move a card (and its sidecar image) into `folder`. Returns the new
    /// id; moving into the current folder is a no-op.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`], [`StoreError::Conflict`] if a card with the
    /// same file name already exists there, or [`StoreError::Io`].
    pub async fn move_card(&self, id: &str, folder: &str) -> Result<String, StoreError> {
        let (id, path) = self.path_of(id)?;
        if !path.is_file() {
            return Err(StoreError::NotFound {
                kind: "card",
                id,
            });
        }
        let folder = fsutil::normalize_folder(folder)?;
        let file_name = file_name_of(&id).to_owned();
        let new_id = if folder.is_empty() {
            file_name
        } else {
            format!("{folder}/{file_name}")
        };
        if new_id == id {
            return Ok(id);
        }
        let new_path = fsutil::resolve(&self.root, &new_id);
        if new_path.exists() {
            return Err(StoreError::Conflict { id: new_id });
        }
        if let Some(parent) = new_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, &e))?;
        }

        let sidecar = find_sidecar_image(&path);
        tokio::fs::rename(&path, &new_path)
            .await
            .map_err(|e| StoreError::io(&path, &e))?;
        if let Some(image) = sidecar {
            if let Some(ext) = image.extension() {
                let target = new_path.with_extension(ext);
                if let Err(e) = tokio::fs::rename(&image, &target).await {
                    warn!(path = %image.display(), error = %e, "failed to move sidecar image");
                }
            }
        }

        info!(from = %id, to = %new_id, "card moved");
        Ok(new_id)
    }

    /// Move a card and its sidecar image to the trash.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] or [`StoreError::Io`].
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let (id, path) = self.path_of(id)?;
        if !path.is_file() {
            return Err(StoreError::NotFound {
                kind: "card",
                id,
            });
        }
        let trash = self.trash.clone();
        tokio::task::spawn_blocking(move || {
            let sidecar = find_sidecar_image(&path);
            fsutil::move_to_trash(&path, &trash)?;
            if let Some(image) = sidecar {
                fsutil::move_to_trash(&image, &trash)?;
            }
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| task_err(&self.root, &e))??;
        info!(id = %id, "card moved to trash");
        Ok(())
    }

    /// Every folder below the cards directory, as relative ids.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the scan task fails.
    pub async fn folders(&self) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            fsutil::walk_dirs(&root)
                .iter()
                .map(|p| fsutil::relative_id(&root, p))
                .collect()
        })
        .await
        .map_err(|e| task_err(&self.root, &e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cardkeep_storage::MemoryBackend;
    use serde_json::json;

    fn v2(name: &str, tags: &[&str]) -> Value {
        json!({
            "spec": "chara_card_v2",
            "spec_version": "2.0",
            "data": {"name": name, "creator": "anon", "tags": tags, "extensions": {}}
        })
    }

    fn fixture() -> (tempfile::TempDir, CardStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CardStore::new(dir.path().join("cards"), dir.path().join("trash"));
        (dir, store)
    }

    #[tokio::test]
    async fn create_names_file_after_card() {
        let (_dir, store) = fixture();
        let a = store.create("", v2("Alice Liddell", &[])).await.unwrap();
        let b = store.create("", v2("Alice Liddell", &[])).await.unwrap();
        let c = store.create("fantasy", v2("Bob", &[])).await.unwrap();
        assert_eq!(a, "Alice_Liddell.json");
        assert_eq!(b, "Alice_Liddell_1.json");
        assert_eq!(c, "fantasy/Bob.json");

        let doc = store.get(&c).await.unwrap();
        assert_eq!(doc.summary.name, "Bob");
        assert_eq!(doc.summary.folder, "fantasy");
        assert_eq!(doc.summary.spec.as_deref(), Some("chara_card_v2"));
    }

    #[tokio::test]
    async fn rejects_unsafe_ids_and_non_objects() {
        let (_dir, store) = fixture();
        assert!(matches!(
            store.get("../secret.json").await,
            Err(StoreError::InvalidId { .. })
        ));
        assert!(matches!(
            store.get("card.txt").await,
            Err(StoreError::InvalidId { .. })
        ));
        assert!(matches!(
            store.create("", json!([1, 2])).await,
            Err(StoreError::InvalidDocument { .. })
        ));
        assert!(matches!(
            store.get("missing.json").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_filters_sorts_and_pages() {
        let (_dir, store) = fixture();
        store.create("", v2("carol", &["Sci-Fi"])).await.unwrap();
        store.create("fantasy", v2("Alice", &["magic"])).await.unwrap();
        store.create("fantasy/elves", v2("bob", &["magic", "elf"])).await.unwrap();
        std::fs::write(store.root().join("broken.json"), b"{oops").unwrap();

        let all = store.list(CardQuery::default()).await.unwrap();
        assert_eq!(all.total, 3);
        let names: Vec<&str> = all.items.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "bob", "carol"]);

        let magic = store
            .list(CardQuery {
                tag: Some("MAGIC".to_owned()),
                ..CardQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(magic.total, 2);

        let in_fantasy = store
            .list(CardQuery {
                folder: Some("fantasy".to_owned()),
                ..CardQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(in_fantasy.total, 2);

        let search = store
            .list(CardQuery {
                search: Some("sci".to_owned()),
                ..CardQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(search.items[0].name, "carol");

        let page2 = store
            .list(CardQuery {
                page: 2,
                page_size: 2,
                ..CardQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page2.total, 3);
        assert_eq!(page2.items.len(), 1);
        assert_eq!(page2.items[0].name, "carol");
    }

    #[tokio::test]
    async fn attributes_update_tags_and_favorite() {
        let (_dir, store) = fixture();
        let id = store.create("", v2("Alice", &["a", "b"])).await.unwrap();

        let summary = store
            .modify_attributes(
                &id,
                &AttributeChange {
                    add_tags: vec!["c".to_owned(), "a".to_owned(), " ".to_owned()],
                    remove_tags: vec!["B".to_owned()],
                    favorite: Some(true),
                },
            )
            .await
            .unwrap();
        assert_eq!(summary.tags, vec!["a", "c"]);
        assert!(summary.favorite);

        let doc = store.get(&id).await.unwrap();
        assert_eq!(doc.card["data"]["extensions"]["fav"], true);
        assert!(doc.card.get("fav").is_none());

        let favorites = store
            .list(CardQuery {
                favorites_only: true,
                ..CardQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(favorites.total, 1);
    }

    #[tokio::test]
    async fn v1_favorite_is_top_level() {
        let (_dir, store) = fixture();
        let id = store
            .create("", json!({"name": "Old", "tags": ["x"]}))
            .await
            .unwrap();
        store
            .modify_attributes(
                &id,
                &AttributeChange {
                    favorite: Some(true),
                    add_tags: vec!["y".to_owned()],
                    ..AttributeChange::default()
                },
            )
            .await
            .unwrap();
        let doc = store.get(&id).await.unwrap();
        assert_eq!(doc.card["fav"], true);
        assert_eq!(doc.card["tags"], json!(["x", "y"]));
        assert!(doc.summary.favorite);
    }

    #[tokio::test]
    async fn move_carries_sidecar_and_detects_conflicts() {
        let (_dir, store) = fixture();
        let id = store.create("", v2("Alice", &[])).await.unwrap();
        std::fs::write(store.root().join("Alice.png"), b"img").unwrap();
        assert_eq!(store.get(&id).await.unwrap().summary.image.as_deref(), Some("Alice.png"));

        let new_id = store.move_card(&id, "archive").await.unwrap();
        assert_eq!(new_id, "archive/Alice.json");
        assert!(store.root().join("archive/Alice.png").exists());
        assert!(!store.root().join("Alice.png").exists());

        assert_eq!(store.move_card(&new_id, "archive").await.unwrap(), new_id);

        store.create("", v2("Alice", &[])).await.unwrap();
        assert!(matches!(
            store.move_card("Alice.json", "archive").await,
            Err(StoreError::Conflict { .. })
        ));

        assert_eq!(store.folders().await.unwrap(), vec!["archive"]);
    }

    #[tokio::test]
    async fn delete_moves_card_and_image_to_trash() {
        let (dir, store) = fixture();
        let id = store.create("", v2("Alice", &[])).await.unwrap();
        std::fs::write(store.root().join("Alice.webp"), b"img").unwrap();

        store.delete(&id).await.unwrap();
        assert!(matches!(store.get(&id).await, Err(StoreError::NotFound { .. })));
        let trashed = std::fs::read_dir(dir.path().join("trash")).unwrap().count();
        assert_eq!(trashed, 2);
        assert!(store.delete(&id).await.is_err());
    }

    #[tokio::test]
    async fn update_records_embedded_lorebook_history() {
        let (_dir, store) = fixture();
        let history = Arc::new(HistoryStore::new(Arc::new(MemoryBackend::new())));
        let store = store.with_history(Arc::clone(&history), 7);

        let mut card = v2("Alice", &[]);
        card["data"]["character_book"] = json!({"entries": [{"id": 0, "content": "old"}]});
        let id = store.create("", card.clone()).await.unwrap();

        // First update assigns uids; old entry had none so it is matched by position.
        card["data"]["character_book"]["entries"][0]["content"] = json!("new");
        store.update(&id, card).await.unwrap();

        let doc = store.get(&id).await.unwrap();
        let uid = doc.card["data"]["character_book"]["entries"][0][history::ENTRY_UID_FIELD]
            .as_str()
            .unwrap()
            .to_owned();
        let (_, path) = store.path_of(&id).unwrap();
        let scope = history::build_scope_key("card", &id, Some(&path));
        let records = history.list(&scope, &uid, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].snapshot["content"], "old");
    }

    #[test]
    fn tag_change_is_ordered_and_unique() {
        let current = vec!["a".to_owned(), "b".to_owned()];
        let out = apply_tag_change(&current, &["b".to_owned(), "c".to_owned()], &["A".to_owned()]);
        assert_eq!(out, vec!["b", "c"]);
    }

    #[test]
    fn tag_change_allows_case_only_rename() {
        let current = vec!["magic".to_owned(), "Elf".to_owned()];
        let out = apply_tag_change(&current, &["Magic".to_owned()], &["magic".to_owned()]);
        assert_eq!(out, vec!["Elf", "Magic"]);

        let out = apply_tag_change(&current, &["ELF".to_owned()], &[]);
        assert_eq!(out, vec!["magic", "Elf"]);
    }
}
