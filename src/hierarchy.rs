//! Lazily populated cache of the content-bearing pages under each top-level
//! page.
//!
//! Every key owns a `watch` slot that starts `Pending` and is completed
//! exactly once with a value, a failure, or a cancellation. Waiters await the
//! slot instead of polling, and population failures wake them with an error.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::model::Page;

/// Where the cache gets the children of a top-level page from.
#[async_trait]
pub trait ChildPageSource: Send + Sync {
    async fn child_pages(&self, top_level_page: &Page) -> anyhow::Result<Vec<Page>>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("child pages of {page_id} could not be loaded: {reason}")]
    Failed { page_id: String, reason: String },
    #[error("resolution of {page_id} was cancelled")]
    Cancelled { page_id: String },
    #[error("child pages of {page_id} not available after {waited_ms}ms")]
    Timeout { page_id: String, waited_ms: u64 },
}

#[derive(Debug, Clone)]
enum Slot {
    Pending,
    Ready(Arc<Vec<Page>>),
    Failed(String),
    Cancelled,
}

struct Entry {
    tx: Arc<watch::Sender<Slot>>,
    populating: bool,
}

impl Entry {
    fn pending() -> Self {
        let (tx, _rx) = watch::channel(Slot::Pending);
        Self {
            tx: Arc::new(tx),
            populating: false,
        }
    }
}

type EntryMap = HashMap<String, Entry>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the completion of one population. The slot is completed with the
/// task's result, or with `Failed` if the task ends without one (panic, or
/// abort before or after its first poll). Either way the entry stops
/// counting as in flight.
struct CompletionGuard {
    page_id: String,
    tx: Arc<watch::Sender<Slot>>,
    entries: Arc<Mutex<EntryMap>>,
    done: bool,
}

impl CompletionGuard {
    fn complete(mut self, slot: Slot) {
        self.finish(slot);
    }

    fn finish(&mut self, slot: Slot) {
        if self.done {
            return;
        }
        self.done = true;
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get_mut(&self.page_id) {
            if Arc::ptr_eq(&entry.tx, &self.tx) {
                entry.populating = false;
            }
        }
        self.tx.send_if_modified(|current| {
            if matches!(current, Slot::Pending) {
                *current = slot;
                true
            } else {
                false
            }
        });
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.finish(Slot::Failed("population task ended without a result".into()));
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Build the cached list for `top_level_page`: itself first when it has
/// data, then its content-bearing children sorted by id without duplicates.
pub fn build_entry(top_level_page: &Page, children: Vec<Page>) -> Vec<Page> {
    let mut children: Vec<Page> = children
        .into_iter()
        .filter(|p| p.has_data && p.id != top_level_page.id)
        .collect();
    children.sort_by(|a, b| a.id.cmp(&b.id));
    children.dedup_by(|a, b| a.id == b.id);
    if top_level_page.has_data {
        children.insert(0, top_level_page.clone());
    }
    children
}

pub struct PageHierarchyCache {
    source: Arc<dyn ChildPageSource>,
    entries: Arc<Mutex<EntryMap>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    resolve_timeout: Option<Duration>,
}

impl PageHierarchyCache {
    pub fn new(source: Arc<dyn ChildPageSource>) -> Self {
        Self {
            source,
            entries: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(Vec::new()),
            resolve_timeout: None,
        }
    }

    /// Bound how long [`Self::resolve`] waits for a pending entry.
    pub fn with_resolve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Start populating an entry for every page in `pages`, one task each.
    ///
    /// Pages already resolved or being populated are skipped; failed or
    /// cancelled entries are retried. Must be called inside a tokio runtime.
    #[instrument(skip_all, fields(pages = pages.len()))]
    pub fn on_top_level_list_changed(&self, pages: &[Page]) {
        let mut starts = Vec::new();
        {
            let mut entries = lock(&self.entries);
            for page in pages {
                let entry = entries.entry(page.id.clone()).or_insert_with(Entry::pending);
                if entry.populating {
                    continue;
                }
                let restart = match &*entry.tx.borrow() {
                    Slot::Ready(_) => continue,
                    Slot::Pending => false,
                    Slot::Failed(_) | Slot::Cancelled => true,
                };
                if restart {
                    entry.tx.send_replace(Slot::Pending);
                }
                entry.populating = true;
                starts.push((page.clone(), Arc::clone(&entry.tx)));
            }
        }

        // Spawned outside the entries lock: a task dropped during spawn
        // completes its guard, which takes that lock.
        let spawned: Vec<JoinHandle<()>> = starts
            .into_iter()
            .map(|(page, tx)| self.spawn_population(page, tx))
            .collect();
        let mut tasks = lock(&self.tasks);
        tasks.retain(|handle| !handle.is_finished());
        tasks.extend(spawned);
    }

    fn spawn_population(&self, page: Page, tx: Arc<watch::Sender<Slot>>) -> JoinHandle<()> {
        let source = Arc::clone(&self.source);
        let guard = CompletionGuard {
            page_id: page.id.clone(),
            tx,
            entries: Arc::clone(&self.entries),
            done: false,
        };
        tokio::spawn(async move {
            let guard = guard;
            let slot = match source.child_pages(&page).await {
                Ok(children) => {
                    let list = build_entry(&page, children);
                    debug!(page_id = %page.id, entries = list.len(), "child pages resolved");
                    Slot::Ready(Arc::new(list))
                }
                Err(err) => {
                    warn!(?err, page_id = %page.id, "failed to load child pages");
                    Slot::Failed(format!("{err:#}"))
                }
            };
            guard.complete(slot);
        })
    }

    /// Resolved list for `page` if already available.
    pub fn get(&self, page: &Page) -> Option<Arc<Vec<Page>>> {
        let entries = lock(&self.entries);
        let entry = entries.get(&page.id)?;
        let slot = entry.tx.borrow();
        match &*slot {
            Slot::Ready(list) => Some(Arc::clone(list)),
            _ => None,
        }
    }

    /// Resolved list for `page`, waiting for its population to finish.
    ///
    /// A page never submitted to [`Self::on_top_level_list_changed`] waits
    /// until it is submitted, the timeout elapses, or the cache is cleared.
    #[instrument(skip_all, fields(page_id = %page.id))]
    pub async fn resolve(&self, page: &Page) -> Result<Arc<Vec<Page>>, HierarchyError> {
        let mut rx = {
            let mut entries = lock(&self.entries);
            entries
                .entry(page.id.clone())
                .or_insert_with(Entry::pending)
                .tx
                .subscribe()
        };

        let wait = async {
            let slot = rx
                .wait_for(|slot| !matches!(slot, Slot::Pending))
                .await
                .map(|slot| slot.clone());
            match slot {
                Ok(Slot::Ready(list)) => Ok(list),
                Ok(Slot::Failed(reason)) => Err(HierarchyError::Failed {
                    page_id: page.id.clone(),
                    reason,
                }),
                Ok(Slot::Cancelled) | Ok(Slot::Pending) | Err(_) => {
                    Err(HierarchyError::Cancelled {
                        page_id: page.id.clone(),
                    })
                }
            }
        };

        match self.resolve_timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait).await.map_err(|_| {
                HierarchyError::Timeout {
                    page_id: page.id.clone(),
                    waited_ms: saturating_millis(timeout),
                }
            })?,
            None => wait.await,
        }
    }

    /// Drop every entry, wake pending waiters with `Cancelled` and abort
    /// in-flight population tasks.
    pub fn clear(&self) {
        let (drained, handles) = {
            let mut entries = lock(&self.entries);
            let handles: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
            let drained: Vec<Entry> = entries.drain().map(|(_, entry)| entry).collect();
            (drained, handles)
        };
        for entry in &drained {
            entry.tx.send_if_modified(|slot| {
                if matches!(slot, Slot::Pending) {
                    *slot = Slot::Cancelled;
                    true
                } else {
                    false
                }
            });
        }
        for handle in handles {
            handle.abort();
        }
        debug!(entries = drained.len(), "page hierarchy cache cleared");
    }

    pub fn len(&self) -> usize {
        let entries = lock(&self.entries);
        entries
            .values()
            .filter(|entry| matches!(&*entry.tx.borrow(), Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PageHierarchyCache {
    fn drop(&mut self) {
        self.clear();
    }
}
