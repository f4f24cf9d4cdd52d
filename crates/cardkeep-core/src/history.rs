//! Per-entry version history for world-info entries.
//!
//! Every lorebook entry carries a stable `st_manager_uid`. When a lorebook is
//! saved, the previous version of each changed entry is appended to its
//! history, so an accidental edit can be rolled back entry by entry.
//!
//! Histories are scoped by lorebook (`build_scope_key`) and stored in a
//! [`StorageBackend`] under
//! `wi_history/<scope>/<hex(entry_uid)>/<created_at_us>_<seq>`, which keeps
//! each entry's records in chronological key order.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cardkeep_storage::StorageBackend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::HistoryError;
use crate::settings::{DEFAULT_WI_ENTRY_HISTORY_LIMIT, MAX_WI_ENTRY_HISTORY_LIMIT};

/// Field holding an entry's stable identifier.
pub const ENTRY_UID_FIELD: &str = "st_manager_uid";

const HISTORY_PREFIX: &str = "wi_history/";

/// Scope key for one lorebook: hex SHA-256 of `type|path`, or
/// `type|id|` when the book has no file of its own.
#[must_use]
pub fn build_scope_key(source_type: &str, source_id: &str, file_path: Option<&Path>) -> String {
    let stype = source_type.trim().to_lowercase();
    let stype = if stype.is_empty() { "unknown" } else { stype.as_str() };
    let raw = match file_path.filter(|p| !p.as_os_str().is_empty()) {
        Some(path) => format!("{stype}|{}", path.display().to_string().replace('\\', "/")),
        None => format!("{stype}|{}|", source_id.trim().replace('\\', "/")),
    };
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Clamp a requested limit to `1..=100`, defaulting to 7.
#[must_use]
pub fn history_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_WI_ENTRY_HISTORY_LIMIT as usize)
        .clamp(1, MAX_WI_ENTRY_HISTORY_LIMIT as usize)
}

/// The stable uid of an entry, or an empty string.
#[must_use]
pub fn entry_uid(entry: &Map<String, Value>) -> String {
    match entry.get(ENTRY_UID_FIELD) {
        Some(Value::String(s)) => s.trim().to_owned(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// The entry objects of a lorebook: `entries` as an object or array, or a
/// bare array of entries.
#[must_use]
pub fn entries(book: &Value) -> Vec<&Map<String, Value>> {
    let list: Box<dyn Iterator<Item = &Value>> = match book {
        Value::Array(items) => Box::new(items.iter()),
        Value::Object(obj) => match obj.get("entries") {
            Some(Value::Array(items)) => Box::new(items.iter()),
            Some(Value::Object(map)) => Box::new(map.values()),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    list.filter_map(Value::as_object).collect()
}

fn entries_mut(book: &mut Value) -> Vec<&mut Map<String, Value>> {
    let list: Box<dyn Iterator<Item = &mut Value>> = match book {
        Value::Array(items) => Box::new(items.iter_mut()),
        Value::Object(obj) => match obj.get_mut("entries") {
            Some(Value::Array(items)) => Box::new(items.iter_mut()),
            Some(Value::Object(map)) => Box::new(map.values_mut()),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    list.filter_map(Value::as_object_mut).collect()
}

fn new_entry_uid() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("wi-{}", &hex[..16])
}

/// Give every entry a unique `st_manager_uid`. Entries without one, or
/// sharing one with an earlier entry, get a fresh `wi-<16 hex>` uid.
///
/// Returns whether anything changed.
pub fn ensure_entry_uids(book: &mut Value) -> bool {
    let mut changed = false;
    let mut used = std::collections::HashSet::new();
    for entry in entries_mut(book) {
        let mut uid = entry_uid(entry);
        if uid.is_empty() || used.contains(&uid) {
            uid = new_entry_uid();
            entry.insert(ENTRY_UID_FIELD.to_owned(), Value::String(uid.clone()));
            changed = true;
        } else if entry.get(ENTRY_UID_FIELD).and_then(Value::as_str) != Some(uid.as_str()) {
            entry.insert(ENTRY_UID_FIELD.to_owned(), Value::String(uid.clone()));
            changed = true;
        }
        used.insert(uid);
    }
    changed
}

/// Copy an entry without its volatile fields (`id`, `uid`,
/// `displayIndex`), pinning the stable uid to `forced_uid` when given.
#[must_use]
pub fn snapshot_entry(entry: &Map<String, Value>, forced_uid: &str) -> Value {
    let mut snap = entry.clone();
    snap.remove("id");
    snap.remove("uid");
    snap.remove("displayIndex");
    let uid = if forced_uid.trim().is_empty() {
        entry_uid(&snap)
    } else {
        forced_uid.trim().to_owned()
    };
    if !uid.is_empty() {
        snap.insert(ENTRY_UID_FIELD.to_owned(), Value::String(uid));
    }
    Value::Object(snap)
}

/// Hex SHA-256 over the compact, key-sorted JSON form of a snapshot.
#[must_use]
pub fn snapshot_hash(snapshot: &Value) -> String {
    // serde_json maps are ordered, so `to_string` is canonical.
    hex::encode(Sha256::digest(snapshot.to_string().as_bytes()))
}

/// A previous version of one entry, waiting to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub entry_uid: String,
    pub snapshot: Value,
}

/// Compare two versions of a lorebook and return the old snapshot of every
/// entry whose content changed.
///
/// Entries are matched by uid; an old entry without a uid is matched by
/// position instead, so the first save after uids were assigned still
/// records history.
#[must_use]
pub fn collect_previous_versions(old_book: &Value, new_book: &Value) -> Vec<EntrySnapshot> {
    let old_entries = entries(old_book);
    let new_entries = entries(new_book);
    if old_entries.is_empty() || new_entries.is_empty() {
        return Vec::new();
    }

    let mut old_by_uid = std::collections::HashMap::new();
    for old in &old_entries {
        let uid = entry_uid(old);
        if !uid.is_empty() {
            old_by_uid.entry(uid).or_insert(*old);
        }
    }

    let mut records = Vec::new();
    for (idx, new) in new_entries.iter().enumerate() {
        let uid = entry_uid(new);
        if uid.is_empty() {
            continue;
        }
        let old = old_by_uid.get(&uid).copied().or_else(|| {
            old_entries
                .get(idx)
                .copied()
                .filter(|fallback| entry_uid(fallback).is_empty())
        });
        let Some(old) = old else {
            continue;
        };

        let old_snapshot = snapshot_entry(old, &uid);
        let new_snapshot = snapshot_entry(new, &uid);
        if snapshot_hash(&old_snapshot) != snapshot_hash(&new_snapshot) {
            records.push(EntrySnapshot {
                entry_uid: uid,
                snapshot: old_snapshot,
            });
        }
    }
    records
}

/// A stored history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Storage-order identifier, unique within the entry's history.
    pub id: String,
    pub entry_uid: String,
    pub created_at: DateTime<Utc>,
    pub snapshot_hash: String,
    pub snapshot: Value,
}

/// Entry history on top of a storage backend.
pub struct HistoryStore {
    backend: Arc<dyn StorageBackend>,
    write_lock: Mutex<()>,
    seq: AtomicU64,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore").finish_non_exhaustive()
    }
}

fn entry_prefix(scope: &str, entry_uid: &str) -> String {
    format!("{HISTORY_PREFIX}{scope}/{}/", hex::encode(entry_uid.as_bytes()))
}

impl HistoryStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
        }
    }

    /// Append previous versions to their entries' histories.
    ///
    /// A record identical to the newest stored snapshot of its entry is
    /// skipped. After each insert the entry's history is trimmed to the
    /// newest `limit` records. Returns the number of records inserted.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the backend fails or a stored record
    /// cannot be decoded.
    pub async fn append(
        &self,
        scope: &str,
        records: Vec<EntrySnapshot>,
        limit: usize,
    ) -> Result<usize, HistoryError> {
        let limit = history_limit(Some(limit));
        let _guard = self.write_lock.lock().await;
        let mut inserted = 0;

        for record in records {
            let uid = record.entry_uid.trim().to_owned();
            let Some(obj) = record.snapshot.as_object() else {
                continue;
            };
            if uid.is_empty() {
                continue;
            }
            let snapshot = snapshot_entry(obj, &uid);
            let hash = snapshot_hash(&snapshot);

            let prefix = entry_prefix(scope, &uid);
            let mut keys = self.backend.list(&prefix).await?;

            if let Some(newest) = keys.last() {
                if let Some(existing) = self.read(newest).await? {
                    if existing.snapshot_hash == hash {
                        continue;
                    }
                }
            }

            let now = Utc::now();
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let id = format!("{:020}_{seq:010}", now.timestamp_micros().max(0));
            let stored = HistoryRecord {
                id: id.clone(),
                entry_uid: uid,
                created_at: now,
                snapshot_hash: hash,
                snapshot,
            };
            let bytes = serde_json::to_vec(&stored).map_err(|e| HistoryError::Serialization {
                reason: e.to_string(),
            })?;
            let key = format!("{prefix}{id}");
            self.backend.put(&key, &bytes).await?;
            keys.push(key);
            inserted += 1;

            if keys.len() > limit {
                let excess = keys.len() - limit;
                for old in &keys[..excess] {
                    self.backend.delete(old).await?;
                }
            }
        }

        if inserted > 0 {
            debug!(scope = %scope, inserted, "entry history appended");
        }
        Ok(inserted)
    }

    /// The newest `limit` records of one entry, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Storage`] if the backend fails. Records that
    /// cannot be decoded are skipped with a warning.
    pub async fn list(
        &self,
        scope: &str,
        entry_uid: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let uid = entry_uid.trim();
        if uid.is_empty() {
            return Ok(Vec::new());
        }
        let limit = history_limit(limit);
        let keys = self.backend.list(&entry_prefix(scope, uid)).await?;

        let mut out = Vec::with_capacity(limit.min(keys.len()));
        for key in keys.iter().rev().take(limit) {
            match self.read(key).await {
                Ok(Some(record)) => out.push(record),
                Ok(None) => {}
                Err(HistoryError::Serialization { reason }) => {
                    warn!(key = %key, reason = %reason, "skipping undecodable history record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    async fn read(&self, key: &str) -> Result<Option<HistoryRecord>, HistoryError> {
        let Some(bytes) = self.backend.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| HistoryError::Serialization {
                reason: e.to_string(),
            })
    }
}
