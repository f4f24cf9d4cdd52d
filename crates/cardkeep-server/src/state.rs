//! Shared application state for the cardkeep server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! handlers via `Arc`. Directory settings can change at runtime, so the
//! file-backed stores are built per request from the effective settings;
//! only the UI metadata store and the parsed whitelist are cached, keyed by
//! the values they were built from.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use cardkeep_core::auth::SessionStore;
use cardkeep_core::backup::BackupService;
use cardkeep_core::cards::CardStore;
use cardkeep_core::history::HistoryStore;
use cardkeep_core::resources::ResourceStore;
use cardkeep_core::settings::{Settings, SettingsStore};
use cardkeep_core::ui_store::UiStore;
use cardkeep_core::whitelist::Whitelist;
use cardkeep_core::worldinfo::WorldInfoStore;
use cardkeep_storage::StorageBackend;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// The JSON settings file and its environment overrides.
    pub settings: Arc<SettingsStore>,
    /// Login sessions.
    pub sessions: SessionStore,
    /// World-info entry history.
    pub history: Arc<HistoryStore>,
    /// Backups and their schedule.
    pub backup: Arc<BackupService>,
    ui: Mutex<Option<Arc<UiStore>>>,
    whitelist: RwLock<(Vec<String>, Arc<Whitelist>)>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    #[must_use]
    pub fn new(settings: Arc<SettingsStore>, history_backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backup: Arc::new(BackupService::new(Arc::clone(&settings))),
            settings,
            sessions: SessionStore::new(),
            history: Arc::new(HistoryStore::new(history_backend)),
            ui: Mutex::new(None),
            whitelist: RwLock::new((Vec::new(), Arc::new(Whitelist::default()))),
        }
    }

    /// The card store for the current settings.
    pub async fn cards(&self) -> CardStore {
        let settings = self.settings.effective().await;
        self.cards_for(&settings)
    }

    #[must_use]
    pub fn cards_for(&self, settings: &Settings) -> CardStore {
        CardStore::new(
            self.settings.resolve(&settings.cards_dir),
            self.settings.resolve(&settings.trash_dir),
        )
        .with_history(Arc::clone(&self.history), settings.history_limit())
    }

    /// The lorebook store for the current settings.
    pub async fn worldinfo(&self) -> WorldInfoStore {
        let settings = self.settings.effective().await;
        WorldInfoStore::new(
            self.settings.resolve(&settings.world_info_dir),
            self.settings.resolve(&settings.trash_dir),
        )
        .with_history(Arc::clone(&self.history), settings.history_limit())
    }

    /// The UI metadata store, rebuilt when `ui_data_path` changes.
    pub async fn ui(&self) -> Arc<UiStore> {
        let settings = self.settings.effective().await;
        let path = self.settings.resolve(&settings.ui_data_path);
        let mut cached = self.ui.lock().await;
        match cached.as_ref() {
            Some(store) if store.path() == path => Arc::clone(store),
            _ => {
                let store = Arc::new(UiStore::new(path));
                *cached = Some(Arc::clone(&store));
                store
            }
        }
    }

    /// The resource folder store for the current settings.
    pub async fn resources(&self) -> ResourceStore {
        let settings = self.settings.effective().await;
        ResourceStore::new(
            self.settings.resolve(&settings.resources_dir),
            self.settings.resolve(&settings.trash_dir),
            self.ui().await,
        )
    }

    /// The whitelist for `rules`, re-parsed only when the rules change.
    /// Invalid rules are skipped with a warning.
    pub async fn whitelist(&self, rules: &[String]) -> Arc<Whitelist> {
        {
            let cached = self.whitelist.read().await;
            if cached.0 == rules {
                return Arc::clone(&cached.1);
            }
        }
        let parsed = Arc::new(Whitelist::parse_lenient(rules));
        *self.whitelist.write().await = (rules.to_vec(), Arc::clone(&parsed));
        parsed
    }
}
