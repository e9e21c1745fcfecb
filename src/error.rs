//! Error kinds surfaced by the parse path.
//!
//! A dropped entry is deliberately NOT an error: parsers skip entries
//! missing their mandatory fields and report a count instead.

use thiserror::Error;

use crate::fetch::FetchError;
use crate::model::FailureKind;

/// Errors surfaced by the single-feed interactive path and recorded
/// per-site during batch crawls.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Network failure or unexpected HTTP status.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The document does not parse as XML at all. Distinct from
    /// [`FeedError::UnknownFormat`]: detection is never attempted on a
    /// document that is not well-formed.
    #[error("malformed document: {0}")]
    Malformed(String),

    /// Well-formed XML, but neither an `rss` nor an Atom `feed` element
    /// was found.
    #[error("unknown feed format: document has neither <rss> nor <feed> root")]
    UnknownFormat,

    /// The URL failed validation before any request was made.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl FeedError {
    /// Classification recorded against a site when a batch crawl fails.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FeedError::Fetch(_) | FeedError::InvalidUrl(_) => FailureKind::Fetch,
            FeedError::Malformed(_) => FailureKind::Malformed,
            FeedError::UnknownFormat => FailureKind::UnknownFormat,
        }
    }
}
