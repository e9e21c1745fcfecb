//! Batch crawl scheduling: bounded, throttled, failure-isolated.
//!
//! One pass pulls the stalest sites from the Repository and runs each
//! through fetch → detect/parse → normalize → upsert. Site failures are
//! recorded, never propagated — a broken feed must not starve the rest of
//! the batch, and because `last_checked_at` is stamped on every outcome it
//! also rotates to the back of the staleness ordering instead of being
//! retried first forever.
//!
//! Dispatches are spaced one delay unit apart regardless of the worker
//! limit, so raising concurrency does not turn the crawler into a burst
//! cannon against third-party hosts.

use std::time::Duration;

use chrono::Utc;
use futures::{stream, StreamExt};

use crate::config::Config;
use crate::dedup::{plan_upsert, UpsertPlan};
use crate::engine::FeedEngine;
use crate::fetch::Validators;
use crate::model::{CrawlOutcome, CrawlResult, FailureKind, ParsedFeed, Site};
use crate::repo::{Notifier, Repository};

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Maximum sites per pass.
    pub batch_size: usize,
    /// Pause between site dispatches.
    pub delay: Duration,
    /// Concurrent site crawls; 1 keeps the pass strictly sequential.
    pub concurrency: usize,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            delay: Duration::from_millis(1000),
            concurrency: 1,
        }
    }
}

impl CrawlOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.crawl_batch_size,
            delay: config.crawl_delay(),
            concurrency: config.crawl_concurrency,
        }
    }
}

/// Run one crawl pass over the stalest registered sites.
///
/// Per-site failures are folded into their [`CrawlResult`]; results
/// arrive in completion order when `concurrency > 1`.
///
/// # Errors
///
/// Only the initial site listing can fail the pass as a whole — after
/// that, every error is isolated to its site.
pub async fn crawl_batch(
    engine: &FeedEngine,
    repo: &dyn Repository,
    notifier: &dyn Notifier,
    options: &CrawlOptions,
) -> anyhow::Result<Vec<CrawlResult>> {
    let sites = repo.crawlable_sites(options.batch_size).await?;
    if sites.is_empty() {
        tracing::info!("no crawlable sites");
        return Ok(Vec::new());
    }

    tracing::info!(
        sites = sites.len(),
        concurrency = options.concurrency.max(1),
        delay_ms = (options.delay.as_millis() as u64),
        "starting crawl pass"
    );

    // The unfold rate-limits dispatch: the next site is yielded one delay
    // unit after the previous one, however many workers are draining
    let delay = options.delay;
    let throttled = stream::unfold((sites.into_iter(), true), move |(mut iter, first)| {
        async move {
            let site = iter.next()?;
            if !first {
                tokio::time::sleep(delay).await;
            }
            Some((site, (iter, false)))
        }
    });

    let results: Vec<CrawlResult> = throttled
        .map(|site| crawl_site(engine, repo, notifier, site))
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    let updated = results
        .iter()
        .filter(|r| matches!(r.outcome, CrawlOutcome::Updated { .. }))
        .count();
    let not_modified = results
        .iter()
        .filter(|r| matches!(r.outcome, CrawlOutcome::NotModified))
        .count();
    let failed = results.len() - updated - not_modified;
    tracing::info!(updated, not_modified, failed, "crawl pass finished");

    Ok(results)
}

/// Crawl one site and record the attempt. The `last_checked_at` stamp is
/// written for every outcome, including failures.
async fn crawl_site(
    engine: &FeedEngine,
    repo: &dyn Repository,
    notifier: &dyn Notifier,
    site: Site,
) -> CrawlResult {
    let site_id = site.id;
    tracing::debug!(site_id = site_id, url = %site.url, "crawling site");

    let (outcome, validators) = process_site(engine, repo, notifier, &site).await;

    let checked_at = Utc::now();
    if let Err(e) = repo
        .update_site_crawl_state(site_id, validators.as_ref(), checked_at)
        .await
    {
        tracing::warn!(site_id = site_id, error = %e, "failed to record crawl state");
    }

    match &outcome {
        CrawlOutcome::Updated { new_items } => {
            tracing::info!(site_id = site_id, new_items = *new_items, "site updated");
        }
        CrawlOutcome::NotModified => {
            tracing::debug!(site_id = site_id, "site not modified");
        }
        CrawlOutcome::Failed { kind, message } => {
            tracing::warn!(site_id = site_id, kind = ?kind, message = %message, "site crawl failed");
        }
    }

    CrawlResult {
        site_id,
        outcome,
        checked_at,
    }
}

/// The fetch → parse → upsert pipeline for one site, strictly sequential.
/// Returns the outcome plus the validators to persist, when any.
///
/// Validators are persisted only when the upserts succeeded: storing a
/// fresh ETag over a half-written batch would make the next crawl 304 and
/// never backfill the missing items.
async fn process_site(
    engine: &FeedEngine,
    repo: &dyn Repository,
    notifier: &dyn Notifier,
    site: &Site,
) -> (CrawlOutcome, Option<Validators>) {
    let Some(feed_url) = site.feed_url.as_deref() else {
        return (
            CrawlOutcome::Failed {
                kind: FailureKind::Fetch,
                message: "no feed URL recorded for site".into(),
            },
            None,
        );
    };

    let prior = Validators {
        etag: site.etag.clone(),
        last_modified: site.last_modified.clone(),
    };

    let feed = match engine.refresh(feed_url, &prior).await {
        Ok(None) => return (CrawlOutcome::NotModified, None),
        Ok(Some(feed)) => feed,
        Err(e) => {
            return (
                CrawlOutcome::Failed {
                    kind: e.failure_kind(),
                    message: e.to_string(),
                },
                None,
            )
        }
    };

    let new_items = match upsert_items(repo, site.id, &feed).await {
        Ok(count) => count,
        Err(e) => {
            return (
                CrawlOutcome::Failed {
                    kind: FailureKind::Repository,
                    message: e.to_string(),
                },
                None,
            )
        }
    };

    if new_items > 0 {
        // Best-effort: the items are already stored either way
        if let Err(e) = notifier.notify_new_items(site.id, new_items).await {
            tracing::warn!(site_id = site.id, error = %e, "notifier failed");
        }
    }

    let validators = Validators {
        etag: feed.etag.clone(),
        last_modified: feed.last_modified.clone(),
    };
    (CrawlOutcome::Updated { new_items }, Some(validators))
}

async fn upsert_items(
    repo: &dyn Repository,
    site_id: i64,
    feed: &ParsedFeed,
) -> anyhow::Result<usize> {
    let mut new_items = 0usize;
    for item in &feed.items {
        // Synthetic identities are never looked up: an unstable guid has
        // no durable row to match
        let existing = if item.identity.is_stable() {
            repo.find_item(site_id, &item.guid).await?
        } else {
            None
        };
        match plan_upsert(existing.as_ref(), item) {
            UpsertPlan::Insert(item) => {
                repo.insert_item(site_id, &item).await?;
                new_items += 1;
            }
            UpsertPlan::Update(item) => {
                repo.update_item(site_id, &item).await?;
            }
        }
    }
    Ok(new_items)
}
