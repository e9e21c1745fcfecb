//! Engine wiring: one HTTP client, one process-wide feed cache, and the
//! entry points the two operating modes share.
//!
//! The interactive path ([`FeedEngine::parse_url`]) is cache-first and
//! validates its externally supplied URL. The crawl path calls
//! [`FeedEngine::refresh`] directly: it owns per-site validators, so the
//! TTL cache is written but never consulted — a cache hit would defeat
//! the 304 revalidation the scheduler depends on.

use std::sync::Arc;

use chrono::Utc;

use crate::cache::FeedCache;
use crate::config::Config;
use crate::discover::{discover_feeds, DiscoveryError, DiscoveryOptions, FeedCandidate};
use crate::error::FeedError;
use crate::fetch::{FetchError, FetchOutcome, Fetcher, Validators};
use crate::model::ParsedFeed;
use crate::normalize::normalize_entry;
use crate::parse::parse_feed;
use crate::util::validate_url;

/// The feed ingestion engine. Construct once per process and share;
/// everything inside is reference-counted or cheap to clone.
pub struct FeedEngine {
    fetcher: Fetcher,
    client: reqwest::Client,
    cache: Arc<FeedCache>,
    discovery: DiscoveryOptions,
    allow_private_networks: bool,
}

impl FeedEngine {
    /// Build an engine from configuration.
    ///
    /// # Errors
    ///
    /// Fails only when the HTTP client cannot be constructed (TLS backend
    /// initialization).
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            fetcher: Fetcher::new(client.clone(), config.request_timeout()),
            client,
            cache: Arc::new(FeedCache::new(config.cache_ttl())),
            discovery: DiscoveryOptions {
                probe_timeout: config.probe_timeout(),
                probe_concurrency: config.probe_concurrency,
                budget: config.discovery_budget(),
            },
            allow_private_networks: config.allow_private_networks,
        })
    }

    /// Interactive single-feed parse: serve from the cache within its TTL
    /// window, otherwise fetch, parse, and normalize.
    ///
    /// # Errors
    ///
    /// [`FeedError`] with the kind the caller needs to relay: invalid
    /// URL, fetch failure, malformed document, or unknown format.
    pub async fn parse_url(&self, url: &str) -> Result<Arc<ParsedFeed>, FeedError> {
        validate_url(url, self.allow_private_networks)
            .map_err(|e| FeedError::InvalidUrl(e.to_string()))?;

        if let Some(hit) = self.cache.get(url) {
            tracing::debug!(url = %url, items = hit.items.len(), "feed cache hit");
            return Ok(hit);
        }

        match self.refresh(url, &Validators::default()).await? {
            Some(feed) => Ok(feed),
            // A 304 to an unconditional GET is a server bug; surface it
            // as the status error it is
            None => Err(FeedError::Fetch(FetchError::HttpStatus(304))),
        }
    }

    /// Conditional fetch + parse + normalize for one feed URL.
    ///
    /// Returns `None` on 304 Not Modified. The cache is written on every
    /// successful parse (so interactive readers benefit from crawl work)
    /// but never consulted here.
    ///
    /// # Errors
    ///
    /// [`FeedError`] on fetch, malformed-document, or unknown-format
    /// failures. Batch callers isolate these per site.
    pub async fn refresh(
        &self,
        url: &str,
        prior: &Validators,
    ) -> Result<Option<Arc<ParsedFeed>>, FeedError> {
        let outcome = self.fetcher.fetch_conditional(url, prior).await?;
        let (bytes, validators) = match outcome {
            FetchOutcome::NotModified => return Ok(None),
            FetchOutcome::Body {
                bytes, validators, ..
            } => (bytes, validators),
        };

        let raw = parse_feed(&bytes)?;
        if raw.skipped > 0 {
            tracing::warn!(
                url = %url,
                skipped = raw.skipped,
                "entries without title or link skipped"
            );
        }

        let now = Utc::now();
        let items = raw
            .entries
            .into_iter()
            .map(|entry| normalize_entry(entry, now))
            .collect();

        let feed = Arc::new(ParsedFeed {
            channel: raw.meta,
            items,
            etag: validators.etag,
            last_modified: validators.last_modified,
            skipped: raw.skipped,
        });

        self.cache.put(url, Arc::clone(&feed));
        tracing::info!(url = %url, items = feed.items.len(), "feed parsed");
        Ok(Some(feed))
    }

    /// Discover candidate feed URLs for a site's human-facing URL.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::InvalidUrl`] only; see [`discover_feeds`].
    pub async fn discover(&self, site_url: &str) -> Result<Vec<FeedCandidate>, DiscoveryError> {
        validate_url(site_url, self.allow_private_networks)
            .map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;
        discover_feeds(&self.client, site_url, &self.discovery).await
    }

    /// The shared parsed-feed cache (reference-counted).
    pub fn cache(&self) -> Arc<FeedCache> {
        Arc::clone(&self.cache)
    }
}
