//! Client-side data layer of the News Server reader: settings sync into a
//! local sqlite cache, page hierarchy resolution and article fetching.

pub mod articles;
pub mod config;
pub mod db;
pub mod hierarchy;
pub mod model;
pub mod remote;
pub mod settings;

pub use articles::NewsDataRepository;
pub use hierarchy::{HierarchyError, PageHierarchyCache};
pub use settings::{SettingsError, SettingsRepository, SyncOutcome};
