//! Database module: local settings cache and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `news_server_sync::db`; the
//! repository API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::SettingsCounts;
