//! Library backups.
//!
//! A backup is a timestamped directory below the backup root holding one
//! sub-directory per resource type (`characters`, `worldbooks`, ...) and a
//! `metadata.json`. Backups can be full or incremental (only files changed
//! since the newest backup, plus files reported through
//! [`BackupService::track_change`]). Old backups are pruned after each run
//! according to `backup.retention_days`.
//!
//! Scheduled runs are driven by a worker in the server that sleeps until
//! [`next_run_after`] and wakes early through [`BackupService::schedule_changed`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tracing::{error, info, warn};

use crate::error::BackupError;
use crate::fsutil;
use crate::settings::{BackupSchedule, BackupSettings, Settings, SettingsStore};

/// Name of the per-backup metadata file.
pub const METADATA_FILE: &str = "metadata.json";

/// Backup root used when `backup.path` is empty.
pub const DEFAULT_BACKUP_DIR: &str = "data/backups";

const RESTORE_ASIDE_SUFFIX: &str = ".restore_backup";

/// Library sections that can be backed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Characters,
    Worldbooks,
    Presets,
    Regexes,
    Scripts,
    QuickReplies,
}

impl ResourceType {
    pub const ALL: [Self; 6] = [
        Self::Characters,
        Self::Worldbooks,
        Self::Presets,
        Self::Regexes,
        Self::Scripts,
        Self::QuickReplies,
    ];

    /// Name used in requests and as the sub-directory of a backup.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Characters => "characters",
            Self::Worldbooks => "worldbooks",
            Self::Presets => "presets",
            Self::Regexes => "regexes",
            Self::Scripts => "scripts",
            Self::QuickReplies => "quickreplies",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// The settings key holding this section's directory.
    #[must_use]
    pub const fn settings_key(self) -> &'static str {
        match self {
            Self::Characters => "cards_dir",
            Self::Worldbooks => "world_info_dir",
            Self::Presets => "presets_dir",
            Self::Regexes => "regex_dir",
            Self::Scripts => "scripts_dir",
            Self::QuickReplies => "quick_replies_dir",
        }
    }

    /// The configured directory of this section.
    #[must_use]
    pub fn dir_in(self, settings: &Settings) -> &str {
        match self {
            Self::Characters => &settings.cards_dir,
            Self::Worldbooks => &settings.world_info_dir,
            Self::Presets => &settings.presets_dir,
            Self::Regexes => &settings.regex_dir,
            Self::Scripts => &settings.scripts_dir,
            Self::QuickReplies => &settings.quick_replies_dir,
        }
    }
}

/// Parameters of a manual or scheduled backup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackupRequest {
    /// Resource type names; `None` backs up everything.
    pub resources: Option<Vec<String>>,
    /// Backup root override.
    pub path: Option<String>,
    pub incremental: bool,
}

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub resources: Vec<String>,
    pub file_count: u64,
    pub size_mb: f64,
    #[serde(default)]
    pub incremental: bool,
    pub path: String,
}

/// Result of [`BackupService::restore`].
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub restored: Vec<String>,
}

/// Partial update of the backup schedule.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScheduleUpdate {
    pub enabled: Option<bool>,
    pub schedule: Option<BackupSchedule>,
    pub hour: Option<u32>,
    pub day_of_week: Option<u32>,
    pub retention_days: Option<u32>,
    pub path: Option<String>,
}

/// Check a client-supplied backup id: `[A-Za-z0-9_-]+`.
///
/// # Errors
///
/// [`BackupError::InvalidId`] otherwise.
pub fn validate_backup_id(id: &str) -> Result<(), BackupError> {
    if !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Ok(())
    } else {
        Err(BackupError::InvalidId { id: id.to_owned() })
    }
}

/// The next scheduled run strictly after `now`, in naive local time.
/// `None` when scheduling is off.
#[must_use]
pub fn next_run_after(backup: &BackupSettings, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if !backup.enabled {
        return None;
    }
    let at = NaiveTime::from_hms_opt(backup.hour.min(23), 0, 0)?;
    let today = now.date().and_time(at);
    match backup.schedule {
        BackupSchedule::Disabled => None,
        BackupSchedule::Daily => Some(if today > now {
            today
        } else {
            today + Duration::days(1)
        }),
        BackupSchedule::Weekly => {
            let current = i64::from(now.date().weekday().num_days_from_sunday());
            let target = i64::from(backup.day_of_week.min(6));
            let mut days = (target - current).rem_euclid(7);
            if days == 0 && today <= now {
                days = 7;
            }
            Some(today + Duration::days(days))
        }
    }
}

/// [`next_run_after`] in the local timezone.
#[must_use]
pub fn next_local_run(backup: &BackupSettings, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let naive = next_run_after(backup, now.naive_local())?;
    // Skip forward over a DST gap rather than losing the run.
    Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}

/// Backup, restore and schedule management.
pub struct BackupService {
    settings: Arc<SettingsStore>,
    lock: Mutex<()>,
    changes: Mutex<HashMap<String, HashMap<String, i64>>>,
    schedule_notify: Notify,
}

impl std::fmt::Debug for BackupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupService").finish_non_exhaustive()
    }
}

fn task_err(e: &tokio::task::JoinError) -> BackupError {
    BackupError::Task {
        reason: e.to_string(),
    }
}

impl BackupService {
    #[must_use]
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            lock: Mutex::new(()),
            changes: Mutex::new(HashMap::new()),
            schedule_notify: Notify::new(),
        }
    }

    fn backup_root(&self, settings: &Settings, override_path: Option<&str>) -> PathBuf {
        let configured = override_path
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| settings.backup.path.trim());
        if configured.is_empty() {
            self.settings.resolve(DEFAULT_BACKUP_DIR)
        } else {
            self.settings.resolve(configured)
        }
    }

    /// Run a backup now.
    ///
    /// Unknown resource types and missing source directories are skipped
    /// with a warning. Runs are serialised.
    ///
    /// # Errors
    ///
    /// [`BackupError::Io`] if the backup directory or metadata cannot be
    /// written, or a copy fails.
    pub async fn trigger(&self, request: BackupRequest) -> Result<BackupMetadata, BackupError> {
        let _guard = self.lock.lock().await;
        let settings = self.settings.effective().await;
        let root = self.backup_root(&settings, request.path.as_deref());

        let mut types = Vec::new();
        match &request.resources {
            None => types.extend(ResourceType::ALL),
            Some(names) => {
                for name in names {
                    match ResourceType::from_name(name) {
                        Some(t) if !types.contains(&t) => types.push(t),
                        Some(_) => {}
                        None => warn!(resource = %name, "unknown backup resource type"),
                    }
                }
            }
        }
        let sources: Vec<(ResourceType, PathBuf)> = types
            .into_iter()
            .map(|t| (t, self.settings.resolve(t.dir_in(&settings))))
            .collect();

        let last_backup = if request.incremental {
            self.list_in(&root)
                .await?
                .first()
                .map(|m| m.timestamp)
        } else {
            None
        };
        let tracked = Arc::new(if request.incremental {
            self.changes.lock().await.clone()
        } else {
            HashMap::new()
        });

        let incremental = request.incremental;
        let root_for_task = root.clone();
        let snapshot = Arc::clone(&tracked);
        let metadata = tokio::task::spawn_blocking(move || {
            run_backup(&root_for_task, &sources, incremental, last_backup, &snapshot)
        })
        .await
        .map_err(|e| task_err(&e))??;

        if incremental {
            clear_consumed_changes(&mut *self.changes.lock().await, &tracked, &metadata.resources);
        }

        info!(
            id = %metadata.id,
            files = metadata.file_count,
            size_mb = metadata.size_mb,
            incremental,
            "backup complete"
        );

        let retention_days = settings.backup.retention_days;
        let keep = metadata.id.clone();
        tokio::task::spawn_blocking(move || prune_backups(&root, retention_days, &keep))
            .await
            .map_err(|e| task_err(&e))?;

        Ok(metadata)
    }

    /// All backups in the configured root, newest first.
    ///
    /// # Errors
    ///
    /// [`BackupError::Task`] if the scan task fails.
    pub async fn list(&self) -> Result<Vec<BackupMetadata>, BackupError> {
        let settings = self.settings.effective().await;
        let root = self.backup_root(&settings, None);
        self.list_in(&root).await
    }

    async fn list_in(&self, root: &Path) -> Result<Vec<BackupMetadata>, BackupError> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || list_backups(&root))
            .await
            .map_err(|e| task_err(&e))
    }

    /// Replace the library sections recorded in a backup with its contents.
    ///
    /// Each section's current directory is moved aside first and put back
    /// if copying the backup in fails.
    ///
    /// # Errors
    ///
    /// [`BackupError::InvalidId`], [`BackupError::NotFound`], or
    /// [`BackupError::Io`] for the first section that could not be restored.
    pub async fn restore(&self, id: &str) -> Result<RestoreOutcome, BackupError> {
        validate_backup_id(id)?;
        let _guard = self.lock.lock().await;
        let settings = self.settings.effective().await;
        let dir = self.backup_root(&settings, None).join(id);
        if !dir.is_dir() {
            return Err(BackupError::NotFound { id: id.to_owned() });
        }

        let targets: Vec<(ResourceType, PathBuf)> = ResourceType::ALL
            .into_iter()
            .map(|t| (t, self.settings.resolve(t.dir_in(&settings))))
            .collect();
        let restored = tokio::task::spawn_blocking(move || restore_backup(&dir, &targets))
            .await
            .map_err(|e| task_err(&e))??;

        info!(id = %id, restored = ?restored, "backup restored");
        Ok(RestoreOutcome { restored })
    }

    /// Delete a backup directory.
    ///
    /// # Errors
    ///
    /// [`BackupError::InvalidId`], [`BackupError::NotFound`] or
    /// [`BackupError::Io`].
    pub async fn delete(&self, id: &str) -> Result<(), BackupError> {
        validate_backup_id(id)?;
        let _guard = self.lock.lock().await;
        let settings = self.settings.effective().await;
        let dir = self.backup_root(&settings, None).join(id);
        if !dir.is_dir() {
            return Err(BackupError::NotFound { id: id.to_owned() });
        }
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| BackupError::io(&dir, &e))?;
        info!(id = %id, "backup deleted");
        Ok(())
    }

    /// The current backup schedule.
    pub async fn schedule(&self) -> BackupSettings {
        self.settings.effective().await.backup
    }

    /// Update and persist the schedule, waking the scheduler.
    ///
    /// # Errors
    ///
    /// [`BackupError::Settings`] if the values are invalid or cannot be
    /// saved.
    pub async fn set_schedule(&self, update: ScheduleUpdate) -> Result<BackupSettings, BackupError> {
        let mut backup = self.settings.file_settings().await.backup;
        if let Some(v) = update.enabled {
            backup.enabled = v;
        }
        if let Some(v) = update.schedule {
            backup.schedule = v;
        }
        if let Some(v) = update.hour {
            backup.hour = v;
        }
        if let Some(v) = update.day_of_week {
            backup.day_of_week = v;
        }
        if let Some(v) = update.retention_days {
            backup.retention_days = v;
        }
        if let Some(v) = update.path {
            backup.path = v.trim().to_owned();
        }
        self.settings.set_backup(backup.clone()).await?;
        self.notify_schedule_changed();
        info!(schedule = ?backup.schedule, enabled = backup.enabled, hour = backup.hour, "backup schedule updated");
        Ok(backup)
    }

    /// Wake the scheduler so it re-reads the schedule.
    pub fn notify_schedule_changed(&self) {
        self.schedule_notify.notify_one();
    }

    /// Resolves when the schedule has changed since the last wait.
    pub async fn schedule_changed(&self) {
        self.schedule_notify.notified().await;
    }

    /// Record that a resource changed, so the next incremental backup
    /// includes it. `timestamp_ms` defaults to now.
    pub async fn track_change(&self, resource_type: &str, resource_id: &str, timestamp_ms: Option<i64>) {
        let ts = timestamp_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
        self.changes
            .lock()
            .await
            .entry(resource_type.to_owned())
            .or_default()
            .insert(resource_id.replace('\\', "/"), ts);
    }

    /// Number of tracked changes per resource type.
    pub async fn tracked_changes(&self) -> HashMap<String, usize> {
        self.changes
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.len()))
            .collect()
    }
}

/// Drop the tracked changes a backup consumed: entries of the backed-up
/// resource types that still carry the timestamp seen in `consumed`.
/// Changes recorded while the backup ran are kept for the next one.
fn clear_consumed_changes(
    changes: &mut HashMap<String, HashMap<String, i64>>,
    consumed: &HashMap<String, HashMap<String, i64>>,
    resources: &[String],
) {
    for name in resources {
        let (Some(current), Some(seen)) = (changes.get_mut(name), consumed.get(name)) else {
            continue;
        };
        current.retain(|id, ts| seen.get(id) != Some(ts));
        if current.is_empty() {
            changes.remove(name);
        }
    }
}

fn unique_backup_dir(root: &Path, stamp: &str) -> (String, PathBuf) {
    let mut id = stamp.to_owned();
    let mut counter = 1u32;
    loop {
        let dir = root.join(&id);
        if !dir.exists() {
            return (id, dir);
        }
        id = format!("{stamp}_{counter}");
        counter = counter.saturating_add(1);
    }
}

#[allow(clippy::cast_precision_loss)]
fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn run_backup(
    root: &Path,
    sources: &[(ResourceType, PathBuf)],
    incremental: bool,
    last_backup: Option<DateTime<Utc>>,
    tracked: &HashMap<String, HashMap<String, i64>>,
) -> Result<BackupMetadata, BackupError> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let (id, dir) = unique_backup_dir(root, &stamp);
    std::fs::create_dir_all(&dir).map_err(|e| BackupError::io(&dir, &e))?;

    let mut resources = Vec::new();
    let mut file_count = 0u64;
    let mut total_bytes = 0u64;

    for (kind, source) in sources {
        if !source.is_dir() {
            warn!(resource = kind.name(), path = %source.display(), "backup source missing, skipped");
            continue;
        }
        let target = dir.join(kind.name());
        let (files, bytes) = if incremental {
            let changed = tracked.get(kind.name());
            incremental_copy(source, &target, last_backup, changed)
        } else {
            fsutil::copy_dir_all(source, &target)
        }
        .map_err(|e| BackupError::io(source, &e))?;
        file_count += files;
        total_bytes += bytes;
        resources.push(kind.name().to_owned());
    }

    let metadata = BackupMetadata {
        id,
        timestamp: Utc::now(),
        resources,
        file_count,
        size_mb: bytes_to_mb(total_bytes),
        incremental,
        path: dir.display().to_string(),
    };
    let meta_path = dir.join(METADATA_FILE);
    let bytes = serde_json::to_vec_pretty(&metadata).map_err(|e| BackupError::Io {
        path: meta_path.display().to_string(),
        reason: e.to_string(),
    })?;
    std::fs::write(&meta_path, bytes).map_err(|e| BackupError::io(&meta_path, &e))?;
    Ok(metadata)
}

/// Copy files modified after `since`, or named in `changed` (by relative
/// path or file name). Everything is copied when there is no previous
/// backup.
fn incremental_copy(
    source: &Path,
    target: &Path,
    since: Option<DateTime<Utc>>,
    changed: Option<&HashMap<String, i64>>,
) -> std::io::Result<(u64, u64)> {
    fsutil::copy_tree(source, target, |rel, meta| {
        let Some(since) = since else {
            return true;
        };
        let name = rel.rsplit('/').next().unwrap_or(rel);
        meta.modified()
            .map(DateTime::<Utc>::from)
            .ok()
            .is_none_or(|m| m > since)
            || changed.is_some_and(|c| c.contains_key(rel) || c.contains_key(name))
    })
}

fn read_metadata(dir: &Path) -> Option<BackupMetadata> {
    let path = dir.join(METADATA_FILE);
    let bytes = std::fs::read(&path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(meta) => Some(meta),
        Err(e) => {
            error!(path = %path.display(), error = %e, "unreadable backup metadata");
            None
        }
    }
}

/// Timestamp of a backup without metadata: its id if it parses, otherwise
/// the directory's modification time.
fn fallback_timestamp(name: &str, dir: &Path) -> DateTime<Utc> {
    let stamp = name.get(..15).unwrap_or(name);
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S")
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .or_else(|| {
            std::fs::metadata(dir)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from)
        })
        .unwrap_or_default()
}

fn list_backups(root: &Path) -> Vec<BackupMetadata> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut backups: Vec<BackupMetadata> = entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| {
            let dir = e.path();
            let name = e.file_name().to_string_lossy().into_owned();
            read_metadata(&dir).unwrap_or_else(|| BackupMetadata {
                timestamp: fallback_timestamp(&name, &dir),
                id: name,
                resources: Vec::new(),
                file_count: 0,
                size_mb: 0.0,
                incremental: false,
                path: dir.display().to_string(),
            })
        })
        .collect();
    backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
    backups
}

/// Whether `id` has the shape of a generated backup directory name:
/// `YYYYMMDD_HHMMSS`, optionally followed by `_N`.
fn is_generated_backup_id(id: &str) -> bool {
    if validate_backup_id(id).is_err() {
        return false;
    }
    let (Some(stamp), Some(rest)) = (id.get(..15), id.get(15..)) else {
        return false;
    };
    let suffix_ok = rest.is_empty()
        || rest
            .strip_prefix('_')
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
    suffix_ok && NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").is_ok()
}

fn prune_backups(root: &Path, retention_days: u32, keep: &str) {
    if retention_days == 0 {
        return;
    }
    let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
    for backup in list_backups(root) {
        if backup.id == keep || backup.timestamp >= cutoff {
            continue;
        }
        if !is_generated_backup_id(&backup.id) {
            warn!(id = %backup.id, "not a backup directory, left in place");
            continue;
        }
        let dir = root.join(&backup.id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => info!(id = %backup.id, "expired backup pruned"),
            Err(e) => error!(id = %backup.id, error = %e, "failed to prune backup"),
        }
    }
}

fn aside_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(RESTORE_ASIDE_SUFFIX);
    PathBuf::from(name)
}

fn restore_backup(
    backup_dir: &Path,
    targets: &[(ResourceType, PathBuf)],
) -> Result<Vec<String>, BackupError> {
    let wanted: Vec<String> = read_metadata(backup_dir).map_or_else(
        || ResourceType::ALL.iter().map(|t| t.name().to_owned()).collect(),
        |m| m.resources,
    );

    let mut restored = Vec::new();
    for (kind, target) in targets {
        if !wanted.iter().any(|w| w == kind.name()) {
            continue;
        }
        let source = backup_dir.join(kind.name());
        if !source.is_dir() {
            continue;
        }

        let aside = aside_path(target);
        if aside.exists() {
            std::fs::remove_dir_all(&aside).map_err(|e| BackupError::io(&aside, &e))?;
        }
        let had_current = target.exists();
        if had_current {
            std::fs::rename(target, &aside).map_err(|e| BackupError::io(target, &e))?;
        }

        if let Err(e) = fsutil::copy_dir_all(&source, target) {
            error!(resource = kind.name(), error = %e, "restore copy failed, rolling back");
            let _ = std::fs::remove_dir_all(target);
            if had_current {
                if let Err(rb) = std::fs::rename(&aside, target) {
                    error!(path = %aside.display(), error = %rb, "rollback failed; previous data left aside");
                }
            }
            return Err(BackupError::io(&source, &e));
        }
        if had_current {
            if let Err(e) = std::fs::remove_dir_all(&aside) {
                warn!(path = %aside.display(), error = %e, "failed to remove restore leftovers");
            }
        }
        restored.push(kind.name().to_owned());
    }
    Ok(restored)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::settings::EnvOverrides;
    use chrono::NaiveDate;

    async fn fixture() -> (tempfile::TempDir, Arc<SettingsStore>, BackupService) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(
            SettingsStore::load(dir.path().join("config.json"), dir.path(), EnvOverrides::default())
                .await
                .unwrap(),
        );
        let cards = dir.path().join("data/library/characters");
        std::fs::create_dir_all(cards.join("sub")).unwrap();
        std::fs::write(cards.join("a.json"), b"{\"a\":1}").unwrap();
        std::fs::write(cards.join("sub/b.json"), b"{\"b\":2}").unwrap();
        let lore = dir.path().join("data/library/lorebooks");
        std::fs::create_dir_all(&lore).unwrap();
        std::fs::write(lore.join("w.json"), b"{}").unwrap();
        let service = BackupService::new(Arc::clone(&settings));
        (dir, settings, service)
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn backup_ids_are_validated() {
        assert!(validate_backup_id("20240101_030000").is_ok());
        assert!(validate_backup_id("20240101_030000_1").is_ok());
        for bad in ["", "..", "a/b", "x y", "../etc"] {
            assert!(validate_backup_id(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn daily_schedule() {
        let backup = BackupSettings {
            enabled: true,
            schedule: BackupSchedule::Daily,
            hour: 3,
            ..BackupSettings::default()
        };
        assert_eq!(next_run_after(&backup, at(2024, 5, 1, 1, 0)), Some(at(2024, 5, 1, 3, 0)));
        assert_eq!(next_run_after(&backup, at(2024, 5, 1, 3, 0)), Some(at(2024, 5, 2, 3, 0)));

        let disabled = BackupSettings {
            enabled: false,
            ..backup
        };
        assert_eq!(next_run_after(&disabled, at(2024, 5, 1, 1, 0)), None);
    }

    #[test]
    fn weekly_schedule() {
        // 2024-05-01 is a Wednesday.
        let backup = BackupSettings {
            enabled: true,
            schedule: BackupSchedule::Weekly,
            hour: 3,
            day_of_week: 0,
            ..BackupSettings::default()
        };
        assert_eq!(next_run_after(&backup, at(2024, 5, 1, 12, 0)), Some(at(2024, 5, 5, 3, 0)));
        // On the day itself, before and after the hour.
        assert_eq!(next_run_after(&backup, at(2024, 5, 5, 2, 0)), Some(at(2024, 5, 5, 3, 0)));
        assert_eq!(next_run_after(&backup, at(2024, 5, 5, 4, 0)), Some(at(2024, 5, 12, 3, 0)));
    }

    #[tokio::test]
    async fn full_backup_writes_metadata_and_lists() {
        let (dir, _settings, service) = fixture().await;
        let meta = service
            .trigger(BackupRequest {
                resources: Some(vec!["characters".into(), "bogus".into(), "presets".into()]),
                ..BackupRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(meta.resources, vec!["characters"]);
        assert_eq!(meta.file_count, 2);
        assert!(!meta.incremental);

        let root = dir.path().join("data/backups");
        assert!(root.join(&meta.id).join(METADATA_FILE).is_file());
        assert!(root.join(&meta.id).join("characters/sub/b.json").is_file());

        // A second run in the same second gets a suffixed id.
        let second = service.trigger(BackupRequest::default()).await.unwrap();
        assert_ne!(second.id, meta.id);
        assert_eq!(second.resources, vec!["characters", "worldbooks"]);

        std::fs::create_dir_all(root.join("20000101_000000")).unwrap();
        let listed = service.list().await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[2].id, "20000101_000000");
        assert_eq!(listed[2].file_count, 0);
    }

    #[tokio::test]
    async fn incremental_backup_copies_changed_files_only() {
        let (dir, _settings, service) = fixture().await;
        service.trigger(BackupRequest::default()).await.unwrap();

        service.track_change("characters", "sub/b.json", None).await;
        let meta = service
            .trigger(BackupRequest {
                resources: Some(vec!["characters".into()]),
                incremental: true,
                ..BackupRequest::default()
            })
            .await
            .unwrap();
        assert!(meta.incremental);
        assert_eq!(meta.file_count, 1);
        let copied = dir.path().join("data/backups").join(&meta.id).join("characters");
        assert!(copied.join("sub/b.json").is_file());
        assert!(!copied.join("a.json").exists());
        assert!(service.tracked_changes().await.get("characters").is_none());
    }

    #[test]
    fn changes_recorded_during_a_backup_survive() {
        let consumed: HashMap<String, HashMap<String, i64>> = HashMap::from([(
            "characters".to_owned(),
            HashMap::from([("a.json".to_owned(), 10), ("b.json".to_owned(), 10)]),
        )]);
        let mut changes = consumed.clone();
        // Touched again while the copy ran, plus a brand new id.
        changes.get_mut("characters").unwrap().insert("b.json".into(), 20);
        changes.get_mut("characters").unwrap().insert("c.json".into(), 15);
        changes.insert(
            "worlds".to_owned(),
            HashMap::from([("w.json".to_owned(), 5)]),
        );

        clear_consumed_changes(&mut changes, &consumed, &["characters".to_owned()]);

        let chars = &changes["characters"];
        assert!(!chars.contains_key("a.json"));
        assert_eq!(chars["b.json"], 20);
        assert_eq!(chars["c.json"], 15);
        assert_eq!(changes["worlds"]["w.json"], 5);

        let consumed_all = changes.clone();
        clear_consumed_changes(&mut changes, &consumed_all, &["characters".to_owned()]);
        assert!(!changes.contains_key("characters"));
        assert!(changes.contains_key("worlds"));
    }

    #[tokio::test]
    async fn retention_prunes_old_backups() {
        let (dir, _settings, service) = fixture().await;
        let root = dir.path().join("data/backups");
        std::fs::create_dir_all(root.join("20000101_000000")).unwrap();

        let meta = service.trigger(BackupRequest::default()).await.unwrap();
        assert!(!root.join("20000101_000000").exists());
        assert!(root.join(&meta.id).exists());
    }

    #[tokio::test]
    async fn retention_leaves_foreign_directories_alone() {
        let (dir, _settings, service) = fixture().await;
        let root = dir.path().join("data/backups");
        std::fs::create_dir_all(root.join("20000101_000000_2")).unwrap();
        // Old enough to expire by its id, but not a name backups ever use.
        std::fs::create_dir_all(root.join("20000101_000000-keep")).unwrap();
        std::fs::write(root.join("20000101_000000-keep/notes.txt"), b"mine").unwrap();

        service.trigger(BackupRequest::default()).await.unwrap();
        assert!(!root.join("20000101_000000_2").exists());
        assert!(root.join("20000101_000000-keep/notes.txt").is_file());
    }

    #[test]
    fn generated_backup_ids() {
        assert!(is_generated_backup_id("20240131_235959"));
        assert!(is_generated_backup_id("20240131_235959_3"));
        assert!(!is_generated_backup_id("20240131_235959_"));
        assert!(!is_generated_backup_id("20240131_235959-x"));
        assert!(!is_generated_backup_id("photos"));
        assert!(!is_generated_backup_id("20241331_000000"));
    }

    #[tokio::test]
    async fn restore_replaces_current_data() {
        let (dir, _settings, service) = fixture().await;
        let meta = service.trigger(BackupRequest::default()).await.unwrap();

        let cards = dir.path().join("data/library/characters");
        std::fs::write(cards.join("a.json"), b"changed").unwrap();
        std::fs::write(cards.join("new.json"), b"{}").unwrap();

        let outcome = service.restore(&meta.id).await.unwrap();
        assert_eq!(outcome.restored, vec!["characters", "worldbooks"]);
        assert_eq!(std::fs::read(cards.join("a.json")).unwrap(), b"{\"a\":1}");
        assert!(!cards.join("new.json").exists());
        assert!(!aside_path(&cards).exists());
    }

    #[tokio::test]
    async fn restore_and_delete_check_ids() {
        let (_dir, _settings, service) = fixture().await;
        assert!(matches!(
            service.restore("../x").await,
            Err(BackupError::InvalidId { .. })
        ));
        assert!(matches!(
            service.delete("20990101_000000").await,
            Err(BackupError::NotFound { .. })
        ));

        let meta = service.trigger(BackupRequest::default()).await.unwrap();
        service.delete(&meta.id).await.unwrap();
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn schedule_update_persists_and_notifies() {
        let (_dir, settings, service) = fixture().await;
        let updated = service
            .set_schedule(ScheduleUpdate {
                enabled: Some(true),
                schedule: Some(BackupSchedule::Weekly),
                day_of_week: Some(2),
                ..ScheduleUpdate::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.day_of_week, 2);
        assert_eq!(settings.file_settings().await.backup, updated);
        assert_eq!(service.schedule().await, updated);

        // The stored permit makes the wait resolve immediately.
        tokio::time::timeout(std::time::Duration::from_secs(1), service.schedule_changed())
            .await
            .unwrap();

        assert!(service
            .set_schedule(ScheduleUpdate {
                hour: Some(30),
                ..ScheduleUpdate::default()
            })
            .await
            .is_err());
    }
}
