//! App settings: remote sync into the local cache, staleness checks and
//! page lookups over the cached copy.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::db::{self, Pool, META_SERVER_SETTINGS_UPDATE_TIME, META_SETTINGS_UPDATE_TIME};
use crate::hierarchy::ChildPageSource;
use crate::model::{Newspaper, Page, PageGroup};
use crate::remote::{RemoteError, SettingsSource};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("local storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    UpToDate,
}

/// Keep the pages worth showing and compute their derived flags.
///
/// A page survives when it is active and its newspaper is in `newspapers`.
/// `has_data` follows the link format. `has_child` is only computed for
/// top-level pages and looks at every active page in `all_pages`, not just
/// the surviving ones. Output is sorted by page id.
pub fn classify_pages<'a, I>(all_pages: I, newspapers: &[Newspaper]) -> Vec<Page>
where
    I: IntoIterator<Item = &'a Page>,
    I::IntoIter: Clone,
{
    let all_pages = all_pages.into_iter();
    let newspaper_ids: HashSet<&str> = newspapers.iter().map(|n| n.id.as_str()).collect();
    let active_parent_ids: HashSet<&str> = all_pages
        .clone()
        .filter(|p| p.active)
        .filter_map(|p| p.parent_page_id.as_deref())
        .collect();

    let mut pages: Vec<Page> = all_pages
        .filter(|p| {
            p.active
                && p.newspaper_id
                    .as_deref()
                    .is_some_and(|id| newspaper_ids.contains(id))
        })
        .map(|p| {
            let mut page = p.clone();
            page.has_data = page.link_format.is_some();
            page.has_child = page.is_top_level() && active_parent_ids.contains(page.id.as_str());
            page
        })
        .collect();
    pages.sort_by(|a, b| a.id.cmp(&b.id));
    pages
}

#[derive(Clone)]
pub struct SettingsRepository {
    pool: Pool,
    source: Arc<dyn SettingsSource>,
}

impl SettingsRepository {
    pub fn new(pool: Pool, source: Arc<dyn SettingsSource>) -> Self {
        Self { pool, source }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Pull the full settings bundle and overwrite the local cache with it.
    ///
    /// Nothing is written when the remote fetch fails. Each table is replaced
    /// in its own transaction, so a storage failure part way leaves earlier
    /// tables updated.
    #[instrument(skip_all)]
    pub async fn load_app_settings(&self) -> Result<(), SettingsError> {
        let bundle = self.source.app_settings().await?;

        let languages: Vec<_> = bundle.languages.values().cloned().collect();
        db::replace_languages(&self.pool, &languages).await?;
        info!(count = languages.len(), "stored languages");

        let countries: Vec<_> = bundle.countries.values().cloned().collect();
        db::replace_countries(&self.pool, &countries).await?;
        info!(count = countries.len(), "stored countries");

        let newspapers: Vec<Newspaper> = bundle
            .newspapers
            .values()
            .filter(|n| n.active)
            .cloned()
            .collect();
        db::replace_newspapers(&self.pool, &newspapers).await?;
        info!(
            count = newspapers.len(),
            inactive = bundle.newspapers.len() - newspapers.len(),
            "stored newspapers"
        );

        let pages = classify_pages(bundle.pages.values(), &newspapers);
        db::replace_pages(&self.pool, &pages).await?;
        info!(
            count = pages.len(),
            dropped = bundle.pages.len() - pages.len(),
            "stored pages"
        );

        let page_groups: Vec<_> = bundle.page_groups.values().cloned().collect();
        db::replace_page_groups(&self.pool, &page_groups).await?;
        info!(count = page_groups.len(), "stored page groups");

        match bundle.last_update_time() {
            Some(ts) => {
                db::set_meta_i64(&self.pool, META_SETTINGS_UPDATE_TIME, ts).await?;
                info!(settings_update_time = ts, "app settings synced");
            }
            None => warn!("settings bundle carries no update time; keeping previous value"),
        }
        Ok(())
    }

    /// Timestamp recorded by the last completed sync, 0 if never synced.
    pub async fn local_settings_update_time(&self) -> Result<i64, SettingsError> {
        let ts = db::get_meta_i64(&self.pool, META_SETTINGS_UPDATE_TIME)
            .await?
            .unwrap_or(0);
        debug!(local_settings_update_time = ts);
        Ok(ts)
    }

    /// Last server timestamp cached by [`Self::is_app_settings_updated`].
    pub async fn cached_server_settings_update_time(&self) -> Result<Option<i64>, SettingsError> {
        Ok(db::get_meta_i64(&self.pool, META_SERVER_SETTINGS_UPDATE_TIME).await?)
    }

    async fn server_settings_update_time(&self) -> Result<i64, SettingsError> {
        let ts = self.source.app_settings_update_time().await?;
        debug!(server_settings_update_time = ts);
        db::set_meta_i64(&self.pool, META_SERVER_SETTINGS_UPDATE_TIME, ts).await?;
        Ok(ts)
    }

    /// Whether the server holds newer settings than the last sync.
    ///
    /// Always records the server timestamp locally, whatever the answer. The
    /// last-sync timestamp only moves on [`Self::load_app_settings`].
    #[instrument(skip_all)]
    pub async fn is_app_settings_updated(&self) -> Result<bool, SettingsError> {
        let local = self.local_settings_update_time().await?;
        let server = self.server_settings_update_time().await?;
        let updated = server > local;
        info!(local, server, updated, "checked app settings freshness");
        Ok(updated)
    }

    /// True iff every settings table holds at least one row.
    #[instrument(skip_all)]
    pub async fn is_settings_data_loaded(&self) -> Result<bool, SettingsError> {
        let counts = db::settings_counts(&self.pool).await?;
        debug!(?counts, "settings table counts");
        Ok(counts.all_present())
    }

    /// Sync when the cache is empty or the server reports newer settings.
    #[instrument(skip_all)]
    pub async fn ensure_settings_loaded(&self) -> Result<SyncOutcome, SettingsError> {
        if !self.is_settings_data_loaded().await? {
            info!("settings cache empty; running initial sync");
            self.load_app_settings().await?;
            return Ok(SyncOutcome::Synced);
        }
        if self.is_app_settings_updated().await? {
            self.load_app_settings().await?;
            return Ok(SyncOutcome::Synced);
        }
        Ok(SyncOutcome::UpToDate)
    }

    pub async fn newspapers(&self) -> Result<Vec<Newspaper>, SettingsError> {
        Ok(db::list_newspapers(&self.pool).await?)
    }

    pub async fn page_groups(&self) -> Result<Vec<PageGroup>, SettingsError> {
        Ok(db::list_page_groups(&self.pool).await?)
    }

    pub async fn page_by_id(&self, page_id: &str) -> Result<Option<Page>, SettingsError> {
        Ok(db::page_by_id(&self.pool, page_id).await?)
    }

    /// Top-level pages of `newspaper`, sorted by id.
    pub async fn top_pages_for_newspaper(
        &self,
        newspaper: &Newspaper,
    ) -> Result<Vec<Page>, SettingsError> {
        Ok(db::top_pages_for_newspaper(&self.pool, &newspaper.id).await?)
    }

    /// Pages naming `page` as parent, sorted by id.
    pub async fn child_pages_for_top_level_page(
        &self,
        page: &Page,
    ) -> Result<Vec<Page>, SettingsError> {
        Ok(db::child_pages_of(&self.pool, &page.id).await?)
    }
}

#[async_trait]
impl ChildPageSource for SettingsRepository {
    async fn child_pages(&self, top_level_page: &Page) -> anyhow::Result<Vec<Page>> {
        Ok(self.child_pages_for_top_level_page(top_level_page).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TOP_LEVEL_PAGE_PARENT_ID;

    fn newspaper(id: &str, active: bool) -> Newspaper {
        Newspaper {
            id: id.into(),
            name: None,
            country_name: None,
            language_id: None,
            active,
        }
    }

    fn page(id: &str, newspaper_id: &str, parent: &str, active: bool, link: Option<&str>) -> Page {
        Page {
            id: id.into(),
            newspaper_id: Some(newspaper_id.into()),
            parent_page_id: Some(parent.into()),
            name: None,
            active,
            link_format: link.map(str::to_string),
            has_data: false,
            has_child: false,
        }
    }

    fn find<'a>(pages: &'a [Page], id: &str) -> &'a Page {
        pages.iter().find(|p| p.id == id).unwrap()
    }

    #[test]
    fn classify_example_hierarchy() {
        let pages = vec![
            page("P1", "N1", TOP_LEVEL_PAGE_PARENT_ID, true, Some("/p1")),
            page("P2", "N1", "P1", true, Some("/p2")),
        ];
        let out = classify_pages(&pages, &[newspaper("N1", true)]);
        assert_eq!(out.len(), 2);
        let p1 = find(&out, "P1");
        assert!(p1.has_data && p1.has_child);
        let p2 = find(&out, "P2");
        assert!(p2.has_data && !p2.has_child);
    }

    #[test]
    fn classify_drops_inactive_pages_and_foreign_newspapers() {
        let pages = vec![
            page("P1", "N1", TOP_LEVEL_PAGE_PARENT_ID, true, None),
            page("P2", "N1", TOP_LEVEL_PAGE_PARENT_ID, false, Some("/p2")),
            page("P3", "N2", TOP_LEVEL_PAGE_PARENT_ID, true, Some("/p3")),
        ];
        let out = classify_pages(&pages, &[newspaper("N1", true)]);
        let ids: Vec<&str> = out.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["P1"]);
        assert!(!out[0].has_data);
    }

    #[test]
    fn has_child_ignores_inactive_children_but_counts_other_newspapers() {
        let pages = vec![
            page("P1", "N1", TOP_LEVEL_PAGE_PARENT_ID, true, None),
            page("P2", "N1", TOP_LEVEL_PAGE_PARENT_ID, true, None),
            page("C1", "N1", "P1", false, Some("/c1")),
            // child filtered out later by newspaper, still counts for has_child
            page("C2", "N9", "P2", true, Some("/c2")),
        ];
        let out = classify_pages(&pages, &[newspaper("N1", true)]);
        assert!(!find(&out, "P1").has_child);
        assert!(find(&out, "P2").has_child);
    }

    #[test]
    fn has_child_stays_false_below_top_level() {
        let pages = vec![
            page("P1", "N1", TOP_LEVEL_PAGE_PARENT_ID, true, None),
            page("P2", "N1", "P1", true, None),
            page("P3", "N1", "P2", true, Some("/p3")),
        ];
        let out = classify_pages(&pages, &[newspaper("N1", true)]);
        assert!(!find(&out, "P2").has_child);
        assert!(find(&out, "P1").has_child);
    }

    #[test]
    fn classify_sorts_by_page_id() {
        let pages = vec![
            page("P3", "N1", "P1", true, Some("/p3")),
            page("P1", "N1", TOP_LEVEL_PAGE_PARENT_ID, true, Some("/p1")),
            page("P2", "N1", "P1", true, None),
        ];
        let out = classify_pages(&pages, &[newspaper("N1", true)]);
        let ids: Vec<&str> = out.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P2", "P3"]);
    }
}
