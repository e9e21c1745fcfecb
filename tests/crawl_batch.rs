//! Multi-pass crawl lifecycle tests: upsert idempotence, publisher-side
//! edits, publication-date non-regression, and conditional revalidation
//! across passes.

use gander::crawl::{crawl_batch, CrawlOptions};
use gander::model::{CrawlOutcome, Site};
use gander::repo::{MemoryRepository, RecordingNotifier};
use gander::{Config, FeedEngine};
use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn feed_xml(title: &str, pub_date: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Lifecycle Feed</title>
  <item>
    <guid>story-1</guid>
    <title>{title}</title>
    <link>https://example.com/story-1</link>
    <pubDate>{pub_date}</pubDate>
  </item>
</channel></rss>"#
    )
}

fn engine() -> FeedEngine {
    let config = Config {
        // Crawl passes in these tests re-fetch on purpose; the parsed-feed
        // cache is not consulted on the crawl path
        allow_private_networks: true,
        ..Config::default()
    };
    FeedEngine::new(&config).unwrap()
}

fn options() -> CrawlOptions {
    CrawlOptions {
        batch_size: 50,
        delay: Duration::from_millis(0),
        concurrency: 1,
    }
}

fn site(id: i64, feed_url: &str) -> Site {
    Site {
        id,
        url: format!("https://site{id}.example.com"),
        feed_url: Some(feed_url.to_owned()),
        etag: None,
        last_modified: None,
        last_checked_at: None,
    }
}

#[tokio::test]
async fn test_upsert_idempotence_one_identity_across_passes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(feed_xml("Original", "Mon, 01 Jan 2024 00:00:00 GMT")),
        )
        .mount(&server)
        .await;

    let repo = MemoryRepository::new();
    repo.add_site(site(1, &format!("{}/rss.xml", server.uri()))).await;
    let notifier = RecordingNotifier::new();
    let engine = engine();

    for _ in 0..3 {
        crawl_batch(&engine, &repo, &notifier, &options()).await.unwrap();
    }

    // One stored identity no matter how often the same feed is crawled
    assert_eq!(repo.item_count().await, 1);
    // Only the first pass counted it as new
    assert_eq!(notifier.calls().await, vec![(1, 1)]);
}

#[tokio::test]
async fn test_publisher_edit_updates_mutable_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(feed_xml("First headline", "Mon, 01 Jan 2024 00:00:00 GMT")),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(feed_xml("Corrected headline", "Mon, 01 Jan 2024 00:00:00 GMT")),
        )
        .mount(&server)
        .await;

    let repo = MemoryRepository::new();
    repo.add_site(site(1, &format!("{}/rss.xml", server.uri()))).await;
    let notifier = RecordingNotifier::new();
    let engine = engine();

    crawl_batch(&engine, &repo, &notifier, &options()).await.unwrap();
    crawl_batch(&engine, &repo, &notifier, &options()).await.unwrap();

    let items = repo.items_for_site(1).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "Corrected headline");
    // An update is not a new item
    assert_eq!(notifier.calls().await, vec![(1, 1)]);
}

#[tokio::test]
async fn test_changed_source_date_moves_published_at() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(feed_xml("Story", "Mon, 01 Jan 2024 00:00:00 GMT")),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(feed_xml("Story", "Fri, 05 Jan 2024 00:00:00 GMT")),
        )
        .mount(&server)
        .await;

    let repo = MemoryRepository::new();
    repo.add_site(site(1, &format!("{}/rss.xml", server.uri()))).await;
    let notifier = RecordingNotifier::new();
    let engine = engine();

    crawl_batch(&engine, &repo, &notifier, &options()).await.unwrap();
    crawl_batch(&engine, &repo, &notifier, &options()).await.unwrap();

    let items = repo.items_for_site(1).await;
    assert_eq!(
        items[0].published_at,
        chrono::DateTime::parse_from_rfc2822("Fri, 05 Jan 2024 00:00:00 GMT")
            .unwrap()
            .with_timezone(&chrono::Utc)
    );
}

#[tokio::test]
async fn test_dropped_source_date_does_not_regress_published_at() {
    // Second revision of the feed loses its pubDate entirely; the stored
    // instant must survive instead of being replaced by ingestion time
    let undated = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Lifecycle Feed</title>
  <item>
    <guid>story-1</guid>
    <title>Story</title>
    <link>https://example.com/story-1</link>
  </item>
</channel></rss>"#;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(feed_xml("Story", "Mon, 01 Jan 2024 00:00:00 GMT")),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(undated))
        .mount(&server)
        .await;

    let repo = MemoryRepository::new();
    repo.add_site(site(1, &format!("{}/rss.xml", server.uri()))).await;
    let notifier = RecordingNotifier::new();
    let engine = engine();

    crawl_batch(&engine, &repo, &notifier, &options()).await.unwrap();
    crawl_batch(&engine, &repo, &notifier, &options()).await.unwrap();

    let items = repo.items_for_site(1).await;
    assert_eq!(
        items[0].published_at,
        chrono::DateTime::parse_from_rfc2822("Mon, 01 Jan 2024 00:00:00 GMT")
            .unwrap()
            .with_timezone(&chrono::Utc)
    );
    assert!(!items[0].date_inferred);
}

#[tokio::test]
async fn test_revalidation_uses_stored_etag_on_next_pass() {
    let server = MockServer::start().await;
    // First pass: fresh body with an ETag
    Mock::given(method("GET"))
        .and(header("If-None-Match", "\"gen-1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(feed_xml("Story", "Mon, 01 Jan 2024 00:00:00 GMT"))
                .insert_header("ETag", "\"gen-1\""),
        )
        .mount(&server)
        .await;

    let repo = MemoryRepository::new();
    repo.add_site(site(1, &format!("{}/rss.xml", server.uri()))).await;
    let notifier = RecordingNotifier::new();
    let engine = engine();

    let first = crawl_batch(&engine, &repo, &notifier, &options()).await.unwrap();
    assert_eq!(first[0].outcome, CrawlOutcome::Updated { new_items: 1 });

    let second = crawl_batch(&engine, &repo, &notifier, &options()).await.unwrap();
    assert_eq!(second[0].outcome, CrawlOutcome::NotModified);

    // Not-modified passes do no item work and send no notifications
    assert_eq!(repo.item_count().await, 1);
    assert_eq!(notifier.calls().await, vec![(1, 1)]);
}

#[tokio::test]
async fn test_batch_processes_stalest_sites_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(feed_xml("Story", "Mon, 01 Jan 2024 00:00:00 GMT")),
        )
        .mount(&server)
        .await;

    let repo = MemoryRepository::new();
    let url = format!("{}/rss.xml", server.uri());
    let mut fresh = site(1, &url);
    fresh.last_checked_at = Some(chrono::Utc::now());
    repo.add_site(fresh).await;
    repo.add_site(site(2, &url)).await; // never checked

    let notifier = RecordingNotifier::new();
    let results = crawl_batch(
        &engine(),
        &repo,
        &notifier,
        &CrawlOptions {
            batch_size: 1,
            ..options()
        },
    )
    .await
    .unwrap();

    // The bounded batch picked the never-checked site
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].site_id, 2);
}
