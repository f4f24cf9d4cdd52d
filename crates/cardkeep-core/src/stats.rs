//! Library statistics.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::StoreError;
use crate::fsutil;
use crate::settings::{Settings, SettingsStore};

/// JSON file counts per library section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryStats {
    pub characters: usize,
    pub worldbooks: usize,
    pub presets: usize,
    pub regex_scripts: usize,
}

/// Count the JSON files below each configured directory. Missing
/// directories count as empty.
///
/// # Errors
///
/// [`StoreError::Io`] if the counting task fails.
pub async fn collect(store: &SettingsStore) -> Result<LibraryStats, StoreError> {
    let settings: Settings = store.effective().await;
    let dirs: [PathBuf; 4] = [
        store.resolve(&settings.cards_dir),
        store.resolve(&settings.world_info_dir),
        store.resolve(&settings.presets_dir),
        store.resolve(&settings.regex_dir),
    ];
    let base = store.base_dir().display().to_string();
    tokio::task::spawn_blocking(move || {
        let count = |i: usize| fsutil::walk_files(&dirs[i], "json").len();
        LibraryStats {
            characters: count(0),
            worldbooks: count(1),
            presets: count(2),
            regex_scripts: count(3),
        }
    })
    .await
    .map_err(|e| StoreError::Io {
        path: base,
        reason: format!("blocking task failed: {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::settings::EnvOverrides;

    #[tokio::test]
    async fn counts_json_files_per_section() {
        let dir = tempfile::tempdir().unwrap();
        let cards = dir.path().join("data/library/characters/sub");
        std::fs::create_dir_all(&cards).unwrap();
        std::fs::write(cards.join("a.json"), b"{}").unwrap();
        std::fs::write(cards.join("a.png"), b"img").unwrap();
        std::fs::write(cards.parent().unwrap().join("b.json"), b"{}").unwrap();

        let store = SettingsStore::load(dir.path().join("config.json"), dir.path(), EnvOverrides::default())
            .await
            .unwrap();
        let stats = collect(&store).await.unwrap();
        assert_eq!(stats, LibraryStats {
            characters: 2,
            ..LibraryStats::default()
        });

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["regexScripts"], 0);
    }
}
