//! Collaborator interfaces for the components this engine deliberately
//! does not implement: item/site persistence and subscriber notification.
//!
//! A real deployment supplies its own implementations backed by whatever
//! store and fan-out pipeline it runs. The in-memory types below exist so
//! the crawl loop can be exercised end-to-end in tests and the CLI demo;
//! they are reference implementations, not a storage layer.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::fetch::Validators;
use crate::model::{Item, Site};

/// Persistence seam. The engine reads sites and writes items plus the
/// per-site crawl bookkeeping fields; everything else about the store is
/// its owner's business.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Sites eligible for a crawl pass: feed URL known, stalest
    /// `last_checked_at` first, at most `limit` of them.
    async fn crawlable_sites(&self, limit: usize) -> Result<Vec<Site>>;

    /// Stored item under `(site_id, guid)`, if any.
    async fn find_item(&self, site_id: i64, guid: &str) -> Result<Option<Item>>;

    async fn insert_item(&self, site_id: i64, item: &Item) -> Result<()>;

    async fn update_item(&self, site_id: i64, item: &Item) -> Result<()>;

    /// Record a crawl attempt: `checked_at` is written unconditionally;
    /// fresh validators are written only when the fetch produced them.
    async fn update_site_crawl_state(
        &self,
        site_id: i64,
        validators: Option<&Validators>,
        checked_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Notification seam: told how many new identities a site's crawl
/// inserted. Fan-out to actual subscribers happens on the other side.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_new_items(&self, site_id: i64, new_items: usize) -> Result<()>;
}

// ============================================================================
// In-memory reference implementations
// ============================================================================

#[derive(Default)]
struct MemoryState {
    sites: HashMap<i64, Site>,
    items: HashMap<(i64, String), Item>,
}

/// Hash-map backed [`Repository`] for tests and the CLI demo crawl.
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_site(&self, site: Site) {
        self.state.write().await.sites.insert(site.id, site);
    }

    pub async fn site(&self, site_id: i64) -> Option<Site> {
        self.state.read().await.sites.get(&site_id).cloned()
    }

    /// All stored items for a site, ordered by publication instant
    /// descending (newest first).
    pub async fn items_for_site(&self, site_id: i64) -> Vec<Item> {
        let state = self.state.read().await;
        let mut items: Vec<Item> = state
            .items
            .iter()
            .filter(|((sid, _), _)| *sid == site_id)
            .map(|(_, item)| item.clone())
            .collect();
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        items
    }

    pub async fn item_count(&self) -> usize {
        self.state.read().await.items.len()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn crawlable_sites(&self, limit: usize) -> Result<Vec<Site>> {
        let state = self.state.read().await;
        let mut sites: Vec<Site> = state
            .sites
            .values()
            .filter(|s| s.feed_url.is_some())
            .cloned()
            .collect();
        // None sorts first: a never-checked site is the stalest possible
        sites.sort_by(|a, b| match (a.last_checked_at, b.last_checked_at) {
            (None, None) => a.id.cmp(&b.id),
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y).then(a.id.cmp(&b.id)),
        });
        sites.truncate(limit);
        Ok(sites)
    }

    async fn find_item(&self, site_id: i64, guid: &str) -> Result<Option<Item>> {
        let state = self.state.read().await;
        Ok(state.items.get(&(site_id, guid.to_owned())).cloned())
    }

    async fn insert_item(&self, site_id: i64, item: &Item) -> Result<()> {
        let mut state = self.state.write().await;
        let key = (site_id, item.guid.clone());
        // Synthetic guids are unique per mint, so plain inserts never
        // collide; a collision here means the upsert policy was bypassed
        anyhow::ensure!(
            !state.items.contains_key(&key) || !item.identity.is_stable(),
            "insert of already-stored identity ({site_id}, {})",
            item.guid
        );
        state.items.insert(key, item.clone());
        Ok(())
    }

    async fn update_item(&self, site_id: i64, item: &Item) -> Result<()> {
        let mut state = self.state.write().await;
        state.items.insert((site_id, item.guid.clone()), item.clone());
        Ok(())
    }

    async fn update_site_crawl_state(
        &self,
        site_id: i64,
        validators: Option<&Validators>,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let site = state
            .sites
            .get_mut(&site_id)
            .ok_or_else(|| anyhow::anyhow!("unknown site {site_id}"))?;
        site.last_checked_at = Some(checked_at);
        if let Some(validators) = validators {
            site.etag = validators.etag.clone();
            site.last_modified = validators.last_modified.clone();
        }
        Ok(())
    }
}

/// [`Notifier`] that records every call, for assertions in tests.
#[derive(Default)]
pub struct RecordingNotifier {
    calls: RwLock<Vec<(i64, usize)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<(i64, usize)> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_new_items(&self, site_id: i64, new_items: usize) -> Result<()> {
        self.calls.write().await.push((site_id, new_items));
        Ok(())
    }
}

/// [`Notifier`] that only logs, for the CLI demo crawl.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_new_items(&self, site_id: i64, new_items: usize) -> Result<()> {
        tracing::info!(site_id = site_id, new_items = new_items, "new items ingested");
        Ok(())
    }
}
