//! Core data model: the canonical item all parsers converge to, the
//! transient per-format extraction shape, and the per-site crawl types.
//!
//! Serialization follows the engine's wire contract: optional fields that
//! resolved to nothing are omitted entirely (`skip_serializing_if`), never
//! emitted as empty strings or empty arrays.

use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Identity
// ============================================================================

/// How an item's identity key (`guid`) was obtained.
///
/// Feeds frequently omit a guid; the normalizer then falls back to the entry
/// link, and as a last resort mints a generation-time token. The provenance
/// matters to the upsert policy: only durable identities participate in
/// dedup matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Identity {
    /// The feed declared a guid/id for the entry.
    #[default]
    Declared,
    /// No guid was declared; the entry link stands in. Durable across
    /// repeated parses of the same document.
    DerivedFromLink,
    /// Neither guid nor link was available; a generation-time token was
    /// minted. NOT stable across parses — two crawls of the same unchanged
    /// document mint two different tokens.
    Synthetic,
}

impl Identity {
    /// Synthetic identities must never be matched against stored rows.
    pub fn is_stable(self) -> bool {
        !matches!(self, Identity::Synthetic)
    }
}

// ============================================================================
// Canonical Item
// ============================================================================

/// A media attachment declared by an entry (`<enclosure>` in RSS).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enclosure {
    pub url: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Byte length as declared by the feed. A non-numeric `length`
    /// attribute degrades to `None` rather than failing the entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

/// The canonical, format-independent unit of syndicated content.
///
/// Invariants:
/// - `guid` is never empty (see [`Identity`] for fallback provenance).
/// - `published_at` is always a valid instant; `date_inferred` records when
///   it was substituted at ingestion time because the source date was
///   absent or unparseable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub guid: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Full content; equals `description` when the feed carried no
    /// dedicated content element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    /// Never `Some(vec![])` — an empty category list is omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosure: Option<Enclosure>,
    /// Identity provenance; engine-internal, not part of the wire shape.
    #[serde(skip_serializing)]
    pub identity: Identity,
    /// True when `published_at` is the ingestion time, not a source date.
    #[serde(skip_serializing)]
    pub date_inferred: bool,
}

// ============================================================================
// Intermediate extraction shape
// ============================================================================

/// Enclosure attributes exactly as found in the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEnclosure {
    pub url: Option<String>,
    pub mime_type: Option<String>,
    pub length: Option<String>,
}

/// Format-specific extraction result for one entry, before normalization.
///
/// All text is held verbatim (entity-decoded, otherwise untouched); the
/// publication timestamp in particular stays a raw string until the
/// normalizer resolves it. Transient: produced by a parser, consumed by
/// the normalizer, discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub published: Option<String>,
    pub author: Option<String>,
    pub guid: Option<String>,
    pub categories: Vec<String>,
    pub enclosure: Option<RawEnclosure>,
}

impl RawEntry {
    /// The parser-level drop rule: an entry carrying neither a title nor a
    /// link cannot be round-tripped meaningfully and is skipped.
    pub fn is_droppable(&self) -> bool {
        let blank = |f: &Option<String>| f.as_deref().map_or(true, |s| s.trim().is_empty());
        blank(&self.title) && blank(&self.link)
    }
}

/// Channel/feed-level metadata, extracted once per document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// RSS `lastBuildDate`, verbatim; Atom has no equivalent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_build_date: Option<String>,
}

/// Result of parsing and normalizing one feed document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFeed {
    pub channel: FeedMeta,
    pub items: Vec<Item>,
    /// Fresh revalidators to carry into the next conditional fetch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Entries silently dropped for lacking both title and link.
    #[serde(skip_serializing)]
    pub skipped: usize,
}

// ============================================================================
// Crawl types
// ============================================================================

/// A registered feed source, owned by the Repository collaborator.
///
/// The engine reads all fields but writes only the caching metadata
/// (`etag`, `last_modified`) and `last_checked_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub id: i64,
    /// Human-facing site URL (discovery input).
    pub url: String,
    /// Feed URL; `None` until discovered.
    pub feed_url: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Error classification recorded against a failed site crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Network error or non-2xx/304 status; retryable on the next
    /// scheduled crawl, never retried inline.
    Fetch,
    /// The document was not well-formed XML.
    Malformed,
    /// Well-formed XML, but neither RSS nor Atom.
    UnknownFormat,
    /// The Repository collaborator rejected a persistence call.
    Repository,
}

/// Per-site outcome of one batch pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "status",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum CrawlOutcome {
    /// The feed was fetched and parsed; `new_items` counts newly inserted
    /// identities (updates to existing identities do not count).
    Updated { new_items: usize },
    /// Server answered 304; no parse work was performed.
    NotModified,
    Failed { kind: FailureKind, message: String },
}

/// Outcome plus the timestamp that is recorded regardless of outcome, so a
/// persistently broken feed still rotates to the back of the staleness
/// ordering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResult {
    pub site_id: i64,
    #[serde(flatten)]
    pub outcome: CrawlOutcome,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item() -> Item {
        Item {
            guid: "g1".into(),
            title: "Title".into(),
            link: Some("https://example.com/1".into()),
            description: None,
            content: None,
            author: None,
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            categories: None,
            enclosure: None,
            identity: Identity::Declared,
            date_inferred: false,
        }
    }

    #[test]
    fn test_item_wire_shape_prunes_absent_fields() {
        let json = serde_json::to_value(item()).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("guid"));
        assert!(obj.contains_key("title"));
        assert!(obj.contains_key("link"));
        assert!(obj.contains_key("publishedAt"));
        // Pruned, not serialized as null/empty
        assert!(!obj.contains_key("description"));
        assert!(!obj.contains_key("content"));
        assert!(!obj.contains_key("author"));
        assert!(!obj.contains_key("categories"));
        assert!(!obj.contains_key("enclosure"));
        // Engine-internal flags never leak onto the wire
        assert!(!obj.contains_key("identity"));
        assert!(!obj.contains_key("dateInferred"));
    }

    #[test]
    fn test_published_at_serializes_as_iso8601() {
        let json = serde_json::to_value(item()).unwrap();
        let published = json["publishedAt"].as_str().unwrap();
        assert!(published.starts_with("2024-01-01T00:00:00"));
    }

    #[test]
    fn test_enclosure_type_key_on_wire() {
        let enc = Enclosure {
            url: "https://example.com/ep.mp3".into(),
            mime_type: Some("audio/mpeg".into()),
            length: Some(1024),
        };
        let json = serde_json::to_value(enc).unwrap();
        assert_eq!(json["type"], "audio/mpeg");
        assert_eq!(json["length"], 1024);
    }

    #[test]
    fn test_crawl_outcome_tagged_serialization() {
        let outcome = CrawlOutcome::Updated { new_items: 3 };
        let json = serde_json::to_value(outcome).unwrap();
        assert_eq!(json["status"], "updated");
        assert_eq!(json["newItems"], 3);

        let failed = CrawlOutcome::Failed {
            kind: FailureKind::UnknownFormat,
            message: "neither rss nor feed".into(),
        };
        let json = serde_json::to_value(failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["kind"], "unknownFormat");
    }

    #[test]
    fn test_drop_rule_requires_both_fields_absent() {
        let mut entry = RawEntry::default();
        assert!(entry.is_droppable());

        entry.title = Some("only a title".into());
        assert!(!entry.is_droppable());

        entry.title = Some("   ".into());
        assert!(entry.is_droppable(), "whitespace-only title is absent");

        entry.link = Some("https://example.com/p".into());
        assert!(!entry.is_droppable());
    }

    #[test]
    fn test_synthetic_identity_is_not_stable() {
        assert!(Identity::Declared.is_stable());
        assert!(Identity::DerivedFromLink.is_stable());
        assert!(!Identity::Synthetic.is_stable());
    }
}
