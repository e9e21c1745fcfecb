//! Conditional HTTP fetching with `ETag`/`Last-Modified` revalidation.
//!
//! The fetcher is deliberately dumb about retries: a failure is surfaced to
//! the caller (interactive) or recorded per-site (batch) and retried only
//! by the next scheduled crawl.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use thiserror::Error;

/// Response bodies are capped to prevent memory exhaustion from a
/// misbehaving or hostile feed host.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a feed document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a status that is neither success nor 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("response too large")]
    ResponseTooLarge,
}

/// Revalidation metadata carried between fetches of one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Outcome of a conditional GET.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Server answered 304 Not Modified; the body was never read.
    NotModified,
    /// Fresh body plus the validators to store for the next fetch.
    Body {
        bytes: Vec<u8>,
        validators: Validators,
        status: u16,
    },
}

/// HTTP fetcher for feed documents.
///
/// Wraps a shared [`reqwest::Client`]; cheap to clone, one per engine.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Issue a GET, sending `If-None-Match`/`If-Modified-Since` when prior
    /// validators are known.
    ///
    /// A 304 response short-circuits to [`FetchOutcome::NotModified`]
    /// without touching the body. Otherwise the body is read (streamed,
    /// size-capped) and returned together with the response's fresh
    /// validators; when the server omits `ETag`/`Last-Modified`, the prior
    /// values are carried forward so revalidation state is never lost.
    ///
    /// # Errors
    ///
    /// [`FetchError`] on network failure, timeout, non-2xx/304 status, or
    /// an oversized body. Callers on the batch path must catch and isolate
    /// these per site.
    pub async fn fetch_conditional(
        &self,
        url: &str,
        prior: &Validators,
    ) -> Result<FetchOutcome, FetchError> {
        let mut request = self.client.get(url);
        if let Some(etag) = &prior.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &prior.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            tracing::debug!(url = %url, "not modified, skipping body");
            return Ok(FetchOutcome::NotModified);
        }

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let status = response.status().as_u16();
        let fresh_etag = header_value(&response, ETAG);
        let fresh_last_modified = header_value(&response, LAST_MODIFIED);
        let validators = Validators {
            etag: fresh_etag.or_else(|| prior.etag.clone()),
            last_modified: fresh_last_modified.or_else(|| prior.last_modified.clone()),
        };

        let bytes = read_limited_bytes(response, MAX_BODY_BYTES).await?;

        Ok(FetchOutcome::Body {
            bytes,
            validators,
            status,
        })
    }
}

fn header_value(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Stream the response body into memory, enforcing `limit`.
///
/// The `Content-Length` header is checked first as a fast path; chunked
/// responses without one are still capped while streaming.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_regex, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = "<rss version=\"2.0\"><channel></channel></rss>";

    fn fetcher() -> Fetcher {
        Fetcher::new(reqwest::Client::new(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_plain_fetch_returns_body_and_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(BODY)
                    .insert_header("ETag", "\"v1\"")
                    .insert_header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT"),
            )
            .mount(&server)
            .await;

        let outcome = fetcher()
            .fetch_conditional(&format!("{}/feed", server.uri()), &Validators::default())
            .await
            .unwrap();

        match outcome {
            FetchOutcome::Body {
                bytes,
                validators,
                status,
            } => {
                assert_eq!(bytes, BODY.as_bytes());
                assert_eq!(status, 200);
                assert_eq!(validators.etag.as_deref(), Some("\"v1\""));
                assert_eq!(
                    validators.last_modified.as_deref(),
                    Some("Mon, 01 Jan 2024 00:00:00 GMT")
                );
            }
            other => panic!("expected Body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_conditional_headers_sent_and_304_short_circuits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"v1\""))
            // NB: wiremock 0.6's exact `header` matcher splits the received
            // value on commas, so a date value like this never compares equal.
            // `header_regex` matches the full raw value; the string below is a
            // plain literal (no regex metacharacters) so it still asserts the
            // exact header the fetcher must send.
            .and(header_regex(
                "If-Modified-Since",
                "Mon, 01 Jan 2024 00:00:00 GMT",
            ))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let prior = Validators {
            etag: Some("\"v1\"".into()),
            last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".into()),
        };
        let outcome = fetcher()
            .fetch_conditional(&format!("{}/feed", server.uri()), &prior)
            .await
            .unwrap();

        assert!(matches!(outcome, FetchOutcome::NotModified));
    }

    #[tokio::test]
    async fn test_missing_response_validators_fall_back_to_prior() {
        let server = MockServer::start().await;
        // Server returns a fresh body but no caching headers at all
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
            .mount(&server)
            .await;

        let prior = Validators {
            etag: Some("\"kept\"".into()),
            last_modified: None,
        };
        let outcome = fetcher()
            .fetch_conditional(&format!("{}/feed", server.uri()), &prior)
            .await
            .unwrap();

        match outcome {
            FetchOutcome::Body { validators, .. } => {
                assert_eq!(validators.etag.as_deref(), Some("\"kept\""));
                assert!(validators.last_modified.is_none());
            }
            other => panic!("expected Body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_success_status_is_typed_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_conditional(&format!("{}/feed", server.uri()), &Validators::default())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus(404)));
    }

    #[tokio::test]
    async fn test_500_is_typed_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1) // exactly one request: no inline retry
            .mount(&server)
            .await;

        let err = fetcher()
            .fetch_conditional(&format!("{}/feed", server.uri()), &Validators::default())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus(500)));
    }
}
