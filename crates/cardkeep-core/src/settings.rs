//! Application settings for cardkeep.
//!
//! Settings live in a JSON file edited through the settings panel. A small
//! set of environment variables override file values at load time; the
//! overrides are captured once and layered over the file form on every read,
//! and are never written back. Keys this version does not know about are
//! kept in [`Settings::extra`] so a save never drops them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::SettingsError;
use crate::whitelist::IpRule;

/// Upper bound for the per-entry history limit.
pub const MAX_WI_ENTRY_HISTORY_LIMIT: u32 = 100;

/// Default per-entry history limit.
pub const DEFAULT_WI_ENTRY_HISTORY_LIMIT: u32 = 7;

/// Longest accepted session lifetime (one year).
pub const MAX_SESSION_TTL_HOURS: u64 = 24 * 366;

/// The settings file form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cards_dir: String,
    pub world_info_dir: String,
    pub presets_dir: String,
    pub regex_dir: String,
    pub scripts_dir: String,
    pub quick_replies_dir: String,
    pub resources_dir: String,
    pub trash_dir: String,
    pub ui_data_path: String,
    pub auth: AuthSettings,
    pub backup: BackupSettings,
    pub wi_entry_history_limit: u32,
    pub page_size: u32,
    pub show_thumbnails: bool,
    pub compact_mode: bool,
    pub auto_sync: bool,
    pub track_changes: bool,
    pub sync_interval: u64,
    pub st_data_path: String,
    /// Keys not modelled above, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cards_dir: "data/library/characters".to_owned(),
            world_info_dir: "data/library/lorebooks".to_owned(),
            presets_dir: "data/library/presets".to_owned(),
            regex_dir: "data/library/regex".to_owned(),
            scripts_dir: "data/library/scripts".to_owned(),
            quick_replies_dir: "data/library/quick_replies".to_owned(),
            resources_dir: "data/assets/card_assets".to_owned(),
            trash_dir: "data/trash".to_owned(),
            ui_data_path: "data/ui_data.json".to_owned(),
            auth: AuthSettings::default(),
            backup: BackupSettings::default(),
            wi_entry_history_limit: DEFAULT_WI_ENTRY_HISTORY_LIMIT,
            page_size: 50,
            show_thumbnails: true,
            compact_mode: false,
            auto_sync: true,
            track_changes: true,
            sync_interval: 60,
            st_data_path: String::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Settings {
    /// Whether login is required: both username and password are set.
    #[must_use]
    pub fn auth_enabled(&self) -> bool {
        !self.auth.username.is_empty() && !self.auth.password.is_empty()
    }

    /// The history limit clamped to `1..=100`.
    #[must_use]
    pub fn history_limit(&self) -> usize {
        self.wi_entry_history_limit
            .clamp(1, MAX_WI_ENTRY_HISTORY_LIMIT) as usize
    }

    /// The settings as served to the browser: the password becomes a
    /// `password_set` flag.
    #[must_use]
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(auth) = value.get_mut("auth").and_then(|a| a.as_object_mut()) {
            auth.remove("password");
            auth.insert(
                "password_set".to_owned(),
                serde_json::Value::Bool(!self.auth.password.is_empty()),
            );
        }
        value
    }

    /// The subset exposed by the v2 config endpoint.
    #[must_use]
    pub fn public_config(&self) -> PublicConfig {
        PublicConfig {
            st_data_path: self.st_data_path.clone(),
            backup: self.backup.clone(),
            auto_sync: self.auto_sync,
            track_changes: self.track_changes,
            sync_interval: self.sync_interval,
            page_size: self.page_size,
            show_thumbnails: self.show_thumbnails,
            compact_mode: self.compact_mode,
        }
    }
}

/// Credentials and network trust.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub username: String,
    pub password: String,
    /// Whitelist rules: IP literals, CIDR blocks or wildcard globs.
    pub trusted_ips: Vec<String>,
    pub session_ttl_hours: u64,
    pub trust_loopback: bool,
    /// Read the client address from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_proxy_headers: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            trusted_ips: Vec::new(),
            session_ttl_hours: 168,
            trust_loopback: true,
            trust_proxy_headers: false,
        }
    }
}

/// How often scheduled backups run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupSchedule {
    #[default]
    Disabled,
    Daily,
    Weekly,
}

/// Backup configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub enabled: bool,
    pub schedule: BackupSchedule,
    /// Local hour of day, `0..=23`.
    pub hour: u32,
    /// `0` = Sunday through `6` = Saturday.
    pub day_of_week: u32,
    /// Backups older than this are pruned; `0` keeps everything.
    pub retention_days: u32,
    /// Backup root; empty means `data/backups`.
    pub path: String,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: BackupSchedule::Disabled,
            hour: 3,
            day_of_week: 0,
            retention_days: 30,
            path: String::new(),
        }
    }
}

impl BackupSettings {
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] for an out-of-range hour or day.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.hour > 23 {
            return Err(invalid("backup.hour", "must be between 0 and 23"));
        }
        if self.day_of_week > 6 {
            return Err(invalid("backup.day_of_week", "must be between 0 and 6"));
        }
        Ok(())
    }
}

/// Fields served and accepted by the v2 config endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PublicConfig {
    pub st_data_path: String,
    pub backup: BackupSettings,
    pub auto_sync: bool,
    pub track_changes: bool,
    pub sync_interval: u64,
    pub page_size: u32,
    pub show_thumbnails: bool,
    pub compact_mode: bool,
}

/// Environment values that take precedence over the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub username: Option<String>,
    pub password: Option<String>,
    pub trusted_ips: Option<Vec<String>>,
    pub session_ttl_hours: Option<u64>,
    pub cards_dir: Option<String>,
    pub world_info_dir: Option<String>,
}

impl EnvOverrides {
    /// Capture overrides from the process environment.
    ///
    /// - `CARDKEEP_AUTH_USERNAME`, `CARDKEEP_AUTH_PASSWORD`
    /// - `CARDKEEP_TRUSTED_IPS`: comma separated rules
    /// - `CARDKEEP_SESSION_TTL_HOURS`
    /// - `CARDKEEP_CARDS_DIR`, `CARDKEEP_WORLD_INFO_DIR`
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Capture overrides through an arbitrary lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let session_ttl_hours = non_empty("CARDKEEP_SESSION_TTL_HOURS").and_then(|v| {
            v.trim().parse().ok().or_else(|| {
                warn!(value = %v, "ignoring unparseable CARDKEEP_SESSION_TTL_HOURS");
                None
            })
        });

        Self {
            username: non_empty("CARDKEEP_AUTH_USERNAME"),
            password: non_empty("CARDKEEP_AUTH_PASSWORD"),
            trusted_ips: non_empty("CARDKEEP_TRUSTED_IPS").map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            }),
            session_ttl_hours,
            cards_dir: non_empty("CARDKEEP_CARDS_DIR"),
            world_info_dir: non_empty("CARDKEEP_WORLD_INFO_DIR"),
        }
    }

    /// Layer the overrides onto `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(v) = &self.username {
            settings.auth.username.clone_from(v);
        }
        if let Some(v) = &self.password {
            settings.auth.password.clone_from(v);
        }
        if let Some(v) = &self.trusted_ips {
            settings.auth.trusted_ips.clone_from(v);
        }
        if let Some(v) = self.session_ttl_hours {
            settings.auth.session_ttl_hours = v;
        }
        if let Some(v) = &self.cards_dir {
            settings.cards_dir.clone_from(v);
        }
        if let Some(v) = &self.world_info_dir {
            settings.world_info_dir.clone_from(v);
        }
    }

    /// Names of the settings fields currently pinned by the environment.
    #[must_use]
    pub fn pinned_fields(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.username.is_some() {
            out.push("auth.username");
        }
        if self.password.is_some() {
            out.push("auth.password");
        }
        if self.trusted_ips.is_some() {
            out.push("auth.trusted_ips");
        }
        if self.session_ttl_hours.is_some() {
            out.push("auth.session_ttl_hours");
        }
        if self.cards_dir.is_some() {
            out.push("cards_dir");
        }
        if self.world_info_dir.is_some() {
            out.push("world_info_dir");
        }
        out
    }
}

/// A partial update from the settings panel. Absent fields are unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub cards_dir: Option<String>,
    pub world_info_dir: Option<String>,
    pub presets_dir: Option<String>,
    pub regex_dir: Option<String>,
    pub scripts_dir: Option<String>,
    pub quick_replies_dir: Option<String>,
    pub resources_dir: Option<String>,
    pub trash_dir: Option<String>,
    pub auth: Option<AuthUpdate>,
    pub backup: Option<BackupSettings>,
    pub wi_entry_history_limit: Option<u32>,
    pub page_size: Option<u32>,
    pub show_thumbnails: Option<bool>,
    pub compact_mode: Option<bool>,
    pub auto_sync: Option<bool>,
    pub track_changes: Option<bool>,
    pub sync_interval: Option<u64>,
    pub st_data_path: Option<String>,
}

/// Partial update of [`AuthSettings`]. An empty password clears it, which
/// disables login.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthUpdate {
    pub username: Option<String>,
    pub password: Option<String>,
    pub trusted_ips: Option<Vec<String>>,
    pub session_ttl_hours: Option<u64>,
    pub trust_loopback: Option<bool>,
    pub trust_proxy_headers: Option<bool>,
}

/// Partial update accepted by the v2 config endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PublicConfigUpdate {
    pub st_data_path: Option<String>,
    pub backup: Option<BackupSettings>,
    pub auto_sync: Option<bool>,
    pub track_changes: Option<bool>,
    pub sync_interval: Option<u64>,
    pub page_size: Option<u32>,
    pub show_thumbnails: Option<bool>,
    pub compact_mode: Option<bool>,
}

impl From<PublicConfigUpdate> for SettingsUpdate {
    fn from(u: PublicConfigUpdate) -> Self {
        Self {
            st_data_path: u.st_data_path,
            backup: u.backup,
            auto_sync: u.auto_sync,
            track_changes: u.track_changes,
            sync_interval: u.sync_interval,
            page_size: u.page_size,
            show_thumbnails: u.show_thumbnails,
            compact_mode: u.compact_mode,
            ..Self::default()
        }
    }
}

/// Result of [`SettingsStore::update`].
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// Effective settings after the update.
    pub settings: Settings,
    /// The effective username or password changed.
    pub credentials_changed: bool,
}

fn invalid(field: &str, reason: &str) -> SettingsError {
    SettingsError::Invalid {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

fn set_dir(target: &mut String, value: Option<String>, field: &str) -> Result<(), SettingsError> {
    if let Some(v) = value {
        let v = v.trim();
        if v.is_empty() {
            return Err(invalid(field, "must not be empty"));
        }
        if v.contains('\0') {
            return Err(invalid(field, "must not contain null bytes"));
        }
        v.clone_into(target);
    }
    Ok(())
}

impl SettingsUpdate {
    /// Validate and merge into `settings`.
    fn merge_into(self, settings: &mut Settings) -> Result<(), SettingsError> {
        set_dir(&mut settings.cards_dir, self.cards_dir, "cards_dir")?;
        set_dir(&mut settings.world_info_dir, self.world_info_dir, "world_info_dir")?;
        set_dir(&mut settings.presets_dir, self.presets_dir, "presets_dir")?;
        set_dir(&mut settings.regex_dir, self.regex_dir, "regex_dir")?;
        set_dir(&mut settings.scripts_dir, self.scripts_dir, "scripts_dir")?;
        set_dir(
            &mut settings.quick_replies_dir,
            self.quick_replies_dir,
            "quick_replies_dir",
        )?;
        set_dir(&mut settings.resources_dir, self.resources_dir, "resources_dir")?;
        set_dir(&mut settings.trash_dir, self.trash_dir, "trash_dir")?;

        if let Some(auth) = self.auth {
            if let Some(username) = auth.username {
                settings.auth.username = username.trim().to_owned();
            }
            if let Some(password) = auth.password {
                settings.auth.password = password;
            }
            if let Some(rules) = auth.trusted_ips {
                let rules: Vec<String> = rules
                    .iter()
                    .map(|r| r.trim().to_owned())
                    .filter(|r| !r.is_empty())
                    .collect();
                for rule in &rules {
                    IpRule::parse(rule)
                        .map_err(|e| invalid("auth.trusted_ips", &e.to_string()))?;
                }
                settings.auth.trusted_ips = rules;
            }
            if let Some(ttl) = auth.session_ttl_hours {
                if ttl == 0 || ttl > MAX_SESSION_TTL_HOURS {
                    return Err(invalid(
                        "auth.session_ttl_hours",
                        "must be between 1 and 8784",
                    ));
                }
                settings.auth.session_ttl_hours = ttl;
            }
            if let Some(v) = auth.trust_loopback {
                settings.auth.trust_loopback = v;
            }
            if let Some(v) = auth.trust_proxy_headers {
                settings.auth.trust_proxy_headers = v;
            }
        }

        if let Some(backup) = self.backup {
            backup.validate()?;
            settings.backup = backup;
        }
        if let Some(limit) = self.wi_entry_history_limit {
            settings.wi_entry_history_limit = limit.clamp(1, MAX_WI_ENTRY_HISTORY_LIMIT);
        }
        if let Some(size) = self.page_size {
            if size == 0 || size > 500 {
                return Err(invalid("page_size", "must be between 1 and 500"));
            }
            settings.page_size = size;
        }
        if let Some(v) = self.sync_interval {
            if v == 0 {
                return Err(invalid("sync_interval", "must be at least 1"));
            }
            settings.sync_interval = v;
        }
        if let Some(v) = self.show_thumbnails {
            settings.show_thumbnails = v;
        }
        if let Some(v) = self.compact_mode {
            settings.compact_mode = v;
        }
        if let Some(v) = self.auto_sync {
            settings.auto_sync = v;
        }
        if let Some(v) = self.track_changes {
            settings.track_changes = v;
        }
        if let Some(v) = self.st_data_path {
            settings.st_data_path = v.trim().to_owned();
        }
        Ok(())
    }
}

/// Owns the settings file and its environment overrides.
pub struct SettingsStore {
    path: PathBuf,
    base_dir: PathBuf,
    overrides: EnvOverrides,
    file: RwLock<Settings>,
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore")
            .field("path", &self.path)
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

impl SettingsStore {
    /// Load the settings file. A missing file yields defaults; the file is
    /// created on the first save.
    ///
    /// `base_dir` anchors relative paths found in the settings.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Io`] if the file exists but cannot be read,
    /// or [`SettingsError::Parse`] if it is not valid settings JSON.
    pub async fn load(
        path: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
        overrides: EnvOverrides,
    ) -> Result<Self, SettingsError> {
        let path = path.into();
        let file = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| SettingsError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "settings file not found, using defaults");
                Settings::default()
            }
            Err(e) => {
                return Err(SettingsError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let pinned = overrides.pinned_fields();
        if !pinned.is_empty() {
            info!(fields = ?pinned, "settings overridden from environment");
        }

        Ok(Self {
            path,
            base_dir: base_dir.into(),
            overrides,
            file: RwLock::new(file),
        })
    }

    /// File settings with environment overrides applied.
    pub async fn effective(&self) -> Settings {
        let mut settings = self.file.read().await.clone();
        self.overrides.apply(&mut settings);
        settings
    }

    /// The settings exactly as stored in the file.
    pub async fn file_settings(&self) -> Settings {
        self.file.read().await.clone()
    }

    /// Fields whose effective value comes from the environment.
    #[must_use]
    pub fn pinned_fields(&self) -> Vec<&'static str> {
        self.overrides.pinned_fields()
    }

    /// Merge `update` into the file settings and persist them.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] if a value fails validation (the
    /// file is left untouched), or [`SettingsError::Io`] if the write fails.
    pub async fn update(&self, update: SettingsUpdate) -> Result<UpdateOutcome, SettingsError> {
        let mut file = self.file.write().await;
        let before = self.with_overrides(&file);

        let mut next = file.clone();
        update.merge_into(&mut next)?;
        self.persist(&next).await?;
        *file = next;

        let settings = self.with_overrides(&file);
        let credentials_changed = before.auth.username != settings.auth.username
            || before.auth.password != settings.auth.password;
        if credentials_changed {
            info!("login credentials changed");
        }
        Ok(UpdateOutcome {
            settings,
            credentials_changed,
        })
    }

    /// Replace the backup section and persist.
    ///
    /// # Errors
    ///
    /// Same as [`SettingsStore::update`].
    pub async fn set_backup(&self, backup: BackupSettings) -> Result<(), SettingsError> {
        backup.validate()?;
        let mut file = self.file.write().await;
        let mut next = file.clone();
        next.backup = backup;
        self.persist(&next).await?;
        *file = next;
        Ok(())
    }

    /// Resolve a settings path against the base directory. Absolute paths
    /// are returned unchanged.
    #[must_use]
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    /// The directory relative settings paths resolve against.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Path of the settings file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_overrides(&self, file: &Settings) -> Settings {
        let mut settings = file.clone();
        self.overrides.apply(&mut settings);
        settings
    }

    async fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        let io_err = |reason: String| SettingsError::Io {
            path: self.path.display().to_string(),
            reason,
        };
        let bytes = serde_json::to_vec_pretty(settings).map_err(|e| io_err(e.to_string()))?;
        crate::fsutil::write_atomic(&self.path, &bytes)
            .await
            .map_err(|e| io_err(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> EnvOverrides {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        EnvOverrides::from_lookup(|k| map.get(k).cloned())
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("config.json"), dir.path(), EnvOverrides::default())
            .await
            .unwrap();
        let settings = store.effective().await;
        assert_eq!(settings, Settings::default());
        assert!(!settings.auth_enabled());
        assert_eq!(settings.history_limit(), 7);
    }

    #[tokio::test]
    async fn parse_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = SettingsStore::load(&path, dir.path(), EnvOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[tokio::test]
    async fn env_overrides_win_and_are_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            br#"{"auth":{"username":"file-user","password":"file-pass"},"cards_dir":"mine"}"#,
        )
        .unwrap();

        let env = overrides(&[
            ("CARDKEEP_AUTH_PASSWORD", "env-pass"),
            ("CARDKEEP_TRUSTED_IPS", "10.0.0.0/8, 192.168.*.*,"),
            ("CARDKEEP_SESSION_TTL_HOURS", "12"),
        ]);
        let store = SettingsStore::load(&path, dir.path(), env).await.unwrap();

        let effective = store.effective().await;
        assert_eq!(effective.auth.username, "file-user");
        assert_eq!(effective.auth.password, "env-pass");
        assert_eq!(effective.auth.trusted_ips, vec!["10.0.0.0/8", "192.168.*.*"]);
        assert_eq!(effective.auth.session_ttl_hours, 12);
        assert_eq!(effective.cards_dir, "mine");

        // A save through the panel cannot defeat the environment value.
        let update = SettingsUpdate {
            auth: Some(AuthUpdate {
                password: Some("panel-pass".to_owned()),
                ..AuthUpdate::default()
            }),
            ..SettingsUpdate::default()
        };
        let outcome = store.update(update).await.unwrap();
        assert_eq!(outcome.settings.auth.password, "env-pass");
        assert!(!outcome.credentials_changed);

        let on_disk: Settings = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.auth.password, "panel-pass");
        assert!(on_disk.auth.trusted_ips.is_empty());
    }

    #[tokio::test]
    async fn unknown_keys_survive_a_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, br#"{"page_size":20,"theme":"dark","plugins":{"x":1}}"#).unwrap();
        let store = SettingsStore::load(&path, dir.path(), EnvOverrides::default())
            .await
            .unwrap();

        store
            .update(SettingsUpdate {
                compact_mode: Some(true),
                ..SettingsUpdate::default()
            })
            .await
            .unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["plugins"]["x"], 1);
        assert_eq!(raw["page_size"], 20);
        assert_eq!(raw["compact_mode"], true);
    }

    #[tokio::test]
    async fn invalid_update_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = SettingsStore::load(&path, dir.path(), EnvOverrides::default())
            .await
            .unwrap();

        let update = SettingsUpdate {
            page_size: Some(10),
            auth: Some(AuthUpdate {
                trusted_ips: Some(vec!["not-an-ip".to_owned()]),
                ..AuthUpdate::default()
            }),
            ..SettingsUpdate::default()
        };
        let err = store.update(update).await.unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { ref field, .. } if field == "auth.trusted_ips"));
        assert!(!path.exists());
        assert_eq!(store.effective().await.page_size, 50);
    }

    #[tokio::test]
    async fn credential_change_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("c.json"), dir.path(), EnvOverrides::default())
            .await
            .unwrap();
        let outcome = store
            .update(SettingsUpdate {
                auth: Some(AuthUpdate {
                    username: Some("admin".to_owned()),
                    password: Some("secret".to_owned()),
                    ..AuthUpdate::default()
                }),
                ..SettingsUpdate::default()
            })
            .await
            .unwrap();
        assert!(outcome.credentials_changed);
        assert!(outcome.settings.auth_enabled());
    }

    #[tokio::test]
    async fn history_limit_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("c.json"), dir.path(), EnvOverrides::default())
            .await
            .unwrap();
        let outcome = store
            .update(SettingsUpdate {
                wi_entry_history_limit: Some(1000),
                ..SettingsUpdate::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.settings.wi_entry_history_limit, 100);

        let mut settings = Settings::default();
        settings.wi_entry_history_limit = 0;
        assert_eq!(settings.history_limit(), 1);
    }

    #[test]
    fn redacted_hides_password() {
        let mut settings = Settings::default();
        settings.auth.password = "hunter2".to_owned();
        let value = settings.redacted();
        assert!(value["auth"].get("password").is_none());
        assert_eq!(value["auth"]["password_set"], true);
        assert!(!value.to_string().contains("hunter2"));
    }

    #[test]
    fn backup_schedule_validation() {
        let mut backup = BackupSettings::default();
        backup.hour = 24;
        assert!(backup.validate().is_err());
        backup.hour = 23;
        backup.day_of_week = 7;
        assert!(backup.validate().is_err());
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let store = SettingsStore {
            path: PathBuf::from("/srv/c.json"),
            base_dir: PathBuf::from("/srv"),
            overrides: EnvOverrides::default(),
            file: RwLock::new(Settings::default()),
        };
        assert_eq!(store.resolve("data/x"), PathBuf::from("/srv/data/x"));
        assert_eq!(store.resolve("/abs/x"), PathBuf::from("/abs/x"));
    }
}
