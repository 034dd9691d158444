use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use news_server_sync::hierarchy::ChildPageSource;
use news_server_sync::model::{Newspaper, Page, SettingsBundle, TOP_LEVEL_PAGE_PARENT_ID};
use news_server_sync::remote::{RemoteError, SettingsSource};
use news_server_sync::{HierarchyError, PageHierarchyCache, SettingsRepository};
use tokio::sync::{Mutex, Notify};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn page(id: &str, parent: &str, has_data: bool) -> Page {
    Page {
        id: id.into(),
        newspaper_id: Some("N1".into()),
        parent_page_id: Some(parent.into()),
        name: Some(format!("Page {id}")),
        active: true,
        link_format: has_data.then(|| format!("/{id}")),
        has_data,
        has_child: false,
    }
}

fn ids(pages: &[Page]) -> Vec<&str> {
    pages.iter().map(|p| p.id.as_str()).collect()
}

/// Child source that can hold fetches until released and fail on demand.
#[derive(Default)]
struct ScriptedChildren {
    children: HashMap<String, Vec<Page>>,
    failing: Vec<String>,
    gate: Option<Arc<Notify>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedChildren {
    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl ChildPageSource for ScriptedChildren {
    async fn child_pages(&self, top_level_page: &Page) -> Result<Vec<Page>> {
        self.calls.lock().await.push(top_level_page.id.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.failing.contains(&top_level_page.id) {
            return Err(anyhow!("storage unavailable"));
        }
        Ok(self
            .children
            .get(&top_level_page.id)
            .cloned()
            .unwrap_or_default())
    }
}

struct StaticSettings(SettingsBundle);

#[async_trait::async_trait]
impl SettingsSource for StaticSettings {
    async fn app_settings(&self) -> std::result::Result<SettingsBundle, RemoteError> {
        Ok(self.0.clone())
    }

    async fn app_settings_update_time(&self) -> std::result::Result<i64, RemoteError> {
        Ok(0)
    }
}

#[tokio::test]
async fn resolves_synced_hierarchy_from_settings_repository() {
    let pool = setup_pool().await;
    let mut bundle = SettingsBundle::default();
    bundle.newspapers.insert(
        "N1".into(),
        Newspaper {
            id: "N1".into(),
            name: None,
            country_name: None,
            language_id: None,
            active: true,
        },
    );
    let mut p1 = page("P1", TOP_LEVEL_PAGE_PARENT_ID, false);
    p1.link_format = Some("/p1".into());
    let mut p2 = page("P2", "P1", false);
    p2.link_format = Some("/p2".into());
    let mut p3 = page("P3", "P1", false);
    p3.link_format = None;
    for p in [p1, p2, p3] {
        bundle.pages.insert(p.id.clone(), p);
    }
    bundle.update_time.insert("-a".into(), 1);

    let repo = SettingsRepository::new(pool, Arc::new(StaticSettings(bundle)));
    repo.load_app_settings().await.unwrap();
    let p1 = repo.page_by_id("P1").await.unwrap().unwrap();

    let cache = PageHierarchyCache::new(Arc::new(repo.clone()));
    cache.on_top_level_list_changed(&[p1.clone()]);
    let resolved = cache.resolve(&p1).await.unwrap();
    assert_eq!(ids(&resolved), vec!["P1", "P2"]);
}

#[tokio::test]
async fn children_sorted_and_top_page_prepended_only_with_data() {
    let mut children = HashMap::new();
    children.insert(
        "A".to_string(),
        vec![page("A3", "A", true), page("A1", "A", true), page("A2", "A", false)],
    );
    children.insert("B".to_string(), vec![page("B2", "B", true), page("B1", "B", true)]);
    let source = Arc::new(ScriptedChildren {
        children,
        ..Default::default()
    });
    let cache = PageHierarchyCache::new(source);

    let a = page("A", TOP_LEVEL_PAGE_PARENT_ID, true);
    let b = page("B", TOP_LEVEL_PAGE_PARENT_ID, false);
    cache.on_top_level_list_changed(&[a.clone(), b.clone()]);

    let ra = cache.resolve(&a).await.unwrap();
    let rb = cache.resolve(&b).await.unwrap();
    assert_eq!(ids(&ra), vec!["A", "A1", "A3"]);
    assert_eq!(ids(&rb), vec!["B1", "B2"]);
    assert!(ra.iter().chain(rb.iter()).all(|p| p.has_data));
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn waiters_share_one_population() {
    let gate = Arc::new(Notify::new());
    let mut children = HashMap::new();
    children.insert("A".to_string(), vec![page("A1", "A", true)]);
    let source = Arc::new(ScriptedChildren {
        children,
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let cache = Arc::new(PageHierarchyCache::new(source.clone()));
    let a = page("A", TOP_LEVEL_PAGE_PARENT_ID, false);

    // Waiter registered before the page is even submitted.
    let early = {
        let cache = cache.clone();
        let a = a.clone();
        tokio::spawn(async move { cache.resolve(&a).await })
    };
    tokio::task::yield_now().await;
    assert!(cache.get(&a).is_none());

    cache.on_top_level_list_changed(&[a.clone()]);
    // Re-submitting while in flight does not start a second fetch.
    cache.on_top_level_list_changed(&[a.clone()]);
    let late = {
        let cache = cache.clone();
        let a = a.clone();
        tokio::spawn(async move { cache.resolve(&a).await })
    };

    gate.notify_one();
    let early = early.await.unwrap().unwrap();
    let late = late.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&early, &late));
    assert_eq!(ids(&early), vec!["A1"]);

    // Already resolved: answered from the cache without another fetch.
    cache.on_top_level_list_changed(&[a.clone()]);
    assert!(cache.get(&a).is_some());
    assert_eq!(source.calls().await, vec!["A".to_string()]);
}

#[tokio::test]
async fn population_failure_wakes_waiters_with_error() {
    let source = Arc::new(ScriptedChildren {
        failing: vec!["A".to_string()],
        ..Default::default()
    });
    let cache = PageHierarchyCache::new(source.clone());
    let a = page("A", TOP_LEVEL_PAGE_PARENT_ID, true);

    cache.on_top_level_list_changed(&[a.clone()]);
    let err = cache.resolve(&a).await.unwrap_err();
    match err {
        HierarchyError::Failed { page_id, reason } => {
            assert_eq!(page_id, "A");
            assert!(reason.contains("storage unavailable"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // A failed entry is retried on the next submission.
    cache.on_top_level_list_changed(&[a.clone()]);
    assert!(cache.resolve(&a).await.is_err());
    assert_eq!(source.calls().await.len(), 2);
}

#[tokio::test]
async fn never_submitted_page_times_out() {
    let cache = PageHierarchyCache::new(Arc::new(ScriptedChildren::default()))
        .with_resolve_timeout(Some(Duration::from_millis(30)));
    let a = page("A", TOP_LEVEL_PAGE_PARENT_ID, true);

    let err = cache.resolve(&a).await.unwrap_err();
    assert_eq!(
        err,
        HierarchyError::Timeout {
            page_id: "A".into(),
            waited_ms: 30
        }
    );
}

#[tokio::test]
async fn clear_cancels_pending_waiters() {
    let gate = Arc::new(Notify::new());
    let source = Arc::new(ScriptedChildren {
        gate: Some(gate),
        ..Default::default()
    });
    let cache = Arc::new(PageHierarchyCache::new(source));
    let a = page("A", TOP_LEVEL_PAGE_PARENT_ID, true);
    let never = page("Z", TOP_LEVEL_PAGE_PARENT_ID, true);

    cache.on_top_level_list_changed(&[a.clone()]);
    let waiters: Vec<_> = [a.clone(), never.clone()]
        .into_iter()
        .map(|p| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve(&p).await })
        })
        .collect();
    // Let both waiters subscribe before tearing down.
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    cache.clear();
    for waiter in waiters {
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, HierarchyError::Cancelled { .. }), "got {err:?}");
    }
    assert!(cache.is_empty());
}

#[tokio::test]
async fn empty_list_does_nothing() {
    let source = Arc::new(ScriptedChildren::default());
    let cache = PageHierarchyCache::new(source.clone());
    cache.on_top_level_list_changed(&[]);
    tokio::task::yield_now().await;
    assert!(cache.is_empty());
    assert!(source.calls().await.is_empty());
}
