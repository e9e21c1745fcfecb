//! Feed document parsing: format detection and per-format extraction.
//!
//! The parse path is two-staged:
//!
//! 1. [`detect_format`] scans the document once, which doubles as the
//!    well-formedness check — a document that is not XML at all is a
//!    [`FeedError::Malformed`], reported *before* any format decision.
//! 2. The matching extractor ([`rss`] or [`atom`]) walks the element tree
//!    and produces [`RawEntry`] values plus channel-level metadata.
//!
//! Extraction is tolerant by design: missing optional fields stay `None`,
//! unknown elements are ignored, and an entry is dropped (and counted)
//! only when it lacks both a title and a link.

mod atom;
mod rss;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::FeedError;
use crate::model::{FeedMeta, RawEntry};

/// The two syndication vocabularies the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
}

/// Raw extraction result for one document, prior to normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFeed {
    pub meta: FeedMeta,
    pub entries: Vec<RawEntry>,
    /// Entries dropped for lacking both title and link.
    pub skipped: usize,
}

/// Decide RSS vs. Atom by scanning the element structure.
///
/// The whole document is walked first, so a malformed document yields
/// [`FeedError::Malformed`] even when an `<rss>` tag appears before the
/// breakage. Detection itself is lenient: the first `rss` or `feed`
/// element anywhere in the tree decides (some generators wrap the feed
/// root in processing instructions or stray container elements).
///
/// # Errors
///
/// - [`FeedError::Malformed`] when the bytes do not parse as XML.
/// - [`FeedError::UnknownFormat`] for well-formed XML with neither root.
pub fn detect_format(bytes: &[u8]) -> Result<FeedFormat, FeedError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().check_end_names = true;

    let mut buf = Vec::new();
    let mut saw_rss = false;
    let mut saw_feed = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"rss" => saw_rss = true,
                b"feed" => saw_feed = true,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(FeedError::Malformed(e.to_string())),
        }
        buf.clear();
    }

    // RSS is checked first: a document carrying both elements is treated
    // as RSS wherever the <feed> element appears
    if saw_rss {
        Ok(FeedFormat::Rss)
    } else if saw_feed {
        Ok(FeedFormat::Atom)
    } else {
        Err(FeedError::UnknownFormat)
    }
}

/// Parse a feed document into its raw extraction shape.
///
/// # Errors
///
/// Same as [`detect_format`]; per-entry problems are never errors, they
/// degrade to missing fields or a skipped entry.
pub fn parse_feed(bytes: &[u8]) -> Result<RawFeed, FeedError> {
    match detect_format(bytes)? {
        FeedFormat::Rss => rss::parse(bytes),
        FeedFormat::Atom => atom::parse(bytes),
    }
}

/// Decode a text event, keeping the raw bytes when unescaping fails.
///
/// Feeds routinely carry HTML entities (`&nbsp;` and friends) that are not
/// XML entities; those must degrade to literal text, not a parse failure.
pub(super) fn text_of(e: &quick_xml::events::BytesText) -> String {
    match e.unescape() {
        Ok(t) => t.into_owned(),
        Err(_) => String::from_utf8_lossy(e).into_owned(),
    }
}

/// Extract a trimmed, non-empty attribute value from a start tag.
///
/// Attribute-level problems (duplicate or unparseable attributes) are
/// skipped rather than propagated.
pub(super) fn attr(e: &quick_xml::events::BytesStart, name: &[u8]) -> Option<String> {
    e.attributes().with_checks(false).flatten().find_map(|a| {
        if a.key.as_ref() != name {
            return None;
        }
        let value = a.unescape_value().ok()?;
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}
