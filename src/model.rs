use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Parent id carried by every top-level page.
pub const TOP_LEVEL_PAGE_PARENT_ID: &str = "PAGE_ID_0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Language {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub name: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Newspaper {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country_name: Option<String>,
    #[serde(default)]
    pub language_id: Option<String>,
    #[serde(default)]
    pub active: bool,
}

/// A section of a newspaper. Pages form a two-level tree: top-level pages
/// have `TOP_LEVEL_PAGE_PARENT_ID` as parent, everything else names a
/// top-level page.
///
/// Equality and hashing only look at `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    #[serde(default, rename = "newsPaperId", alias = "newspaperId")]
    pub newspaper_id: Option<String>,
    #[serde(default)]
    pub parent_page_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub link_format: Option<String>,
    /// Computed during sync, never read from the server.
    #[serde(skip_deserializing)]
    pub has_data: bool,
    /// Computed during sync, never read from the server.
    #[serde(skip_deserializing)]
    pub has_child: bool,
}

impl Page {
    pub fn is_top_level(&self) -> bool {
        self.parent_page_id.as_deref() == Some(TOP_LEVEL_PAGE_PARENT_ID)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl PartialEq for Page {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Page {}

impl Hash for Page {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageGroup {
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub page_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    /// Attached after fetch from the requesting page.
    #[serde(default)]
    pub page_id: Option<String>,
    /// Attached after fetch from the requesting page.
    #[serde(default)]
    pub newspaper_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub publication_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub article_text: Option<String>,
    #[serde(default)]
    pub image_links: Vec<String>,
    #[serde(default)]
    pub preview_image_link: Option<String>,
}

/// Snapshot of all app settings as served by the news server.
///
/// `update_time` is keyed by push id; keys sort chronologically, so the
/// greatest key holds the authoritative "settings last updated" value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsBundle {
    #[serde(default)]
    pub languages: BTreeMap<String, Language>,
    #[serde(default)]
    pub countries: BTreeMap<String, Country>,
    #[serde(default)]
    pub newspapers: BTreeMap<String, Newspaper>,
    #[serde(default)]
    pub pages: BTreeMap<String, Page>,
    #[serde(default)]
    pub page_groups: BTreeMap<String, PageGroup>,
    #[serde(default)]
    pub update_time: BTreeMap<String, i64>,
}

impl SettingsBundle {
    pub fn last_update_time(&self) -> Option<i64> {
        self.update_time.values().next_back().copied()
    }
}
