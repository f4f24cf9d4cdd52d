//! Process configuration for the cardkeep server.
//!
//! Read once at startup from `CARDKEEP_*` environment variables. Application
//! settings (directories, credentials, trusted IPs) live in the JSON settings
//! file instead; see [`cardkeep_core::settings`].

use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 5000;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Directory that relative paths resolve against.
    pub base_dir: PathBuf,
    /// The JSON settings file.
    pub config_path: PathBuf,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Where world-info entry history is kept.
    pub history_storage: HistoryStorage,
    /// Seconds between expired-session sweeps.
    pub session_scan_interval_secs: u64,
}

/// Backend for the entry history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryStorage {
    /// In-memory; history is lost on restart.
    Memory,
    /// A redb database file.
    Redb { path: PathBuf },
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// - `CARDKEEP_BIND_ADDR`: full bind address (overrides `PORT`)
    /// - `PORT`: port to bind on `0.0.0.0`
    /// - `CARDKEEP_BASE_DIR`: base directory (default `.`)
    /// - `CARDKEEP_CONFIG`: settings file (default `<base>/config.json`)
    /// - `CARDKEEP_LOG_LEVEL`: log filter (default `info`)
    /// - `CARDKEEP_HISTORY_STORAGE`: `memory` or `redb` (default `redb`)
    /// - `CARDKEEP_HISTORY_PATH`: redb file (default `<base>/data/history.redb`)
    /// - `CARDKEEP_SESSION_SCAN_INTERVAL`: seconds (default `300`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Priority: CARDKEEP_BIND_ADDR > PORT > default 127.0.0.1:5000
        let default_addr = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT));
        let bind_addr = if let Some(addr) = var("CARDKEEP_BIND_ADDR") {
            addr.trim().parse().unwrap_or(default_addr)
        } else if let Some(port) = var("PORT") {
            SocketAddr::from(([0, 0, 0, 0], port.trim().parse().unwrap_or(DEFAULT_PORT)))
        } else {
            default_addr
        };

        let base_dir = PathBuf::from(var("CARDKEEP_BASE_DIR").unwrap_or_else(|| ".".to_owned()));
        let config_path = var("CARDKEEP_CONFIG")
            .map_or_else(|| base_dir.join("config.json"), PathBuf::from);

        let log_level = var("CARDKEEP_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let history_storage = match var("CARDKEEP_HISTORY_STORAGE")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "memory" => HistoryStorage::Memory,
            _ => HistoryStorage::Redb {
                path: var("CARDKEEP_HISTORY_PATH")
                    .map_or_else(|| base_dir.join("data/history.redb"), PathBuf::from),
            },
        };

        let session_scan_interval_secs = var("CARDKEEP_SESSION_SCAN_INTERVAL")
            .and_then(|v| v.trim().parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(300);

        Self {
            bind_addr,
            base_dir,
            config_path,
            log_level,
            history_storage,
            session_scan_interval_secs,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.bind_addr, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(cfg.config_path, PathBuf::from("./config.json"));
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.history_storage, HistoryStorage::Redb {
            path: PathBuf::from("./data/history.redb"),
        });
        assert_eq!(cfg.session_scan_interval_secs, 300);
    }

    #[test]
    fn bind_addr_beats_port() {
        let cfg = config(&[("PORT", "8080")]);
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse().unwrap());

        let cfg = config(&[("PORT", "8080"), ("CARDKEEP_BIND_ADDR", "127.0.0.1:9000")]);
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn paths_follow_base_dir() {
        let cfg = config(&[
            ("CARDKEEP_BASE_DIR", "/srv/cardkeep"),
            ("CARDKEEP_HISTORY_STORAGE", "MEMORY"),
            ("CARDKEEP_SESSION_SCAN_INTERVAL", "0"),
        ]);
        assert_eq!(cfg.config_path, PathBuf::from("/srv/cardkeep/config.json"));
        assert_eq!(cfg.history_storage, HistoryStorage::Memory);
        assert_eq!(cfg.session_scan_interval_secs, 300);
    }
}
