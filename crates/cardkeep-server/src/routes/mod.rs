//! HTTP route modules.

pub mod auth;
pub mod cards;
pub mod resources;
pub mod settings;
pub mod ui;
pub mod v2;
pub mod worldinfo;
