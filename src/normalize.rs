//! Normalization of raw extractions into canonical [`Item`]s.
//!
//! Every fallback rule that keeps the canonical model total lives here:
//! date resolution, guid substitution with identity provenance, category
//! flattening, and empty-field pruning. Normalization never fails — a
//! bad field degrades, it does not reject the entry.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

use crate::model::{Enclosure, Identity, Item, RawEntry};
use crate::util::strip_control_chars;

/// Monotonic tie-breaker so two synthetic guids minted in the same
/// instant still differ.
static SYNTHETIC_SEQ: AtomicU64 = AtomicU64::new(0);

/// Convert one raw entry into a canonical item.
///
/// `now` is the ingestion instant, injected by the caller: it becomes
/// `published_at` when the source date is absent or unparseable (flagged
/// via `date_inferred`), and it seeds synthetic guids.
pub fn normalize_entry(raw: RawEntry, now: DateTime<Utc>) -> Item {
    let title = clean(raw.title).unwrap_or_else(|| "Untitled".to_string());
    let link = clean(raw.link);
    let description = clean(raw.description);
    // Full content falls back to the description; consumers always get
    // the richest text the source offered
    let content = clean(raw.content).or_else(|| description.clone());
    let author = clean(raw.author);

    let (published_at, date_inferred) = match raw.published.as_deref().and_then(parse_date) {
        Some(instant) => (instant, false),
        None => (now, true),
    };

    let categories: Vec<String> = raw
        .categories
        .into_iter()
        .filter_map(|c| clean(Some(c)))
        .collect();
    let categories = (!categories.is_empty()).then_some(categories);

    let (guid, identity) = match clean(raw.guid) {
        Some(declared) => (declared, Identity::Declared),
        None => match &link {
            Some(link) => (link.clone(), Identity::DerivedFromLink),
            None => (synthetic_guid(now), Identity::Synthetic),
        },
    };

    let enclosure = raw.enclosure.and_then(|enc| {
        let url = clean(enc.url)?;
        Some(Enclosure {
            url,
            mime_type: clean(enc.mime_type),
            length: enc.length.as_deref().and_then(|l| l.trim().parse().ok()),
        })
    });

    Item {
        guid,
        title,
        link,
        description,
        content,
        author,
        published_at,
        categories,
        enclosure,
        identity,
        date_inferred,
    }
}

/// Parse a raw source date through the fallback chain: RFC 2822 (RSS
/// `pubDate`), RFC 3339 (Atom `published`/`updated`), then two lenient
/// shapes seen in the wild.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Strip control characters, trim, and prune to `None` when nothing
/// remains. Feed text reaches logs and downstream consumers verbatim, so
/// terminal escape sequences must not survive normalization.
fn clean(value: Option<String>) -> Option<String> {
    let value = value?;
    let stripped = strip_control_chars(&value);
    let trimmed = stripped.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Mint a generation-time identity token for an entry that declared
/// neither guid nor link. Unique per call, NOT stable across parses —
/// callers must check [`Identity::Synthetic`] before using it as an
/// upsert key.
fn synthetic_guid(now: DateTime<Utc>) -> String {
    let seq = SYNTHETIC_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    hasher.update(seq.to_be_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("generated-{}-{}", now.timestamp_millis(), &digest[..12])
}
