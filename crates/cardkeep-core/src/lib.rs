//! Core library for cardkeep.
//!
//! Everything that does not speak HTTP: the JSON settings file and its
//! environment overrides, login sessions, the IP whitelist, the card and
//! lorebook stores, world-info entry history, per-card UI metadata and
//! resource folders, tag automation, backups and library statistics.

pub mod auth;
pub mod automation;
pub mod backup;
pub mod cards;
pub mod error;
pub mod fsutil;
pub mod history;
pub mod resources;
pub mod settings;
pub mod stats;
pub mod ui_store;
pub mod whitelist;
pub mod worldinfo;
