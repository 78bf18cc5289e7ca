//! Fetch execution and failure classification
//!
//! A fetch attempt never unwinds into the orchestrator: every outcome is
//! an explicit [`FetchOutcome`] value, and retry decisions are a pure
//! function of the failure kind and attempt count (see
//! [`BackoffPolicy`](crate::engine::BackoffPolicy)).

use crate::config::{Renderer, SiteSpec};
use crate::engine::browser::BrowserSession;
use crate::state::PageDescriptor;
use crate::RakeError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// What went wrong with a fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Request or readiness wait exceeded the configured timeout
    Timeout,

    /// HTTP 429
    RateLimited,

    /// HTTP 5xx
    ServerError(u16),

    /// Connection refused, reset, or DNS failure
    Connection,

    /// HTTP 404
    NotFound,

    /// HTTP 401 or 403
    Forbidden,

    /// Any other 4xx
    ClientError(u16),

    /// The descriptor did not resolve to a fetchable URL
    MalformedUrl,

    /// Headless browser failure (navigation, evaluation, dead session)
    Render,
}

impl FailureKind {
    /// Transient failures are eligible for retry; fatal ones are
    /// page-level failures with no retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::RateLimited
                | Self::ServerError(_)
                | Self::Connection
                | Self::Render
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError(_) => "server_error",
            Self::Connection => "connection",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::ClientError(_) => "client_error",
            Self::MalformedUrl => "malformed_url",
            Self::Render => "render",
        }
    }
}

/// Result of one fetch attempt, consumed once by the extractor or by
/// retry logic
#[derive(Debug)]
pub enum FetchOutcome {
    /// Page content ready for extraction
    Content {
        body: String,
        status: u16,
        final_url: Url,
    },

    /// Worth retrying per the backoff policy
    Transient { kind: FailureKind, message: String },

    /// Page-level failure, never retried
    Fatal { kind: FailureKind, message: String },
}

impl FetchOutcome {
    /// Wraps a failure in the variant its kind dictates
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        if kind.is_transient() {
            Self::Transient { kind, message }
        } else {
            Self::Fatal { kind, message }
        }
    }
}

/// Maps an HTTP status code to a failure kind, or None for success
pub fn classify_status(status: u16) -> Option<FailureKind> {
    match status {
        200..=299 => None,
        404 | 410 => Some(FailureKind::NotFound),
        429 => Some(FailureKind::RateLimited),
        401 | 403 => Some(FailureKind::Forbidden),
        400..=499 => Some(FailureKind::ClientError(status)),
        _ => Some(FailureKind::ServerError(status)),
    }
}

/// Static HTTP fetch variant
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a client shaped by the site's fetch settings. One client per
    /// site-run keeps its connection pool and cookies scoped to that site.
    pub fn new(spec: &SiteSpec) -> Result<Self, RakeError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &spec.fetch.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RakeError::Internal(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RakeError::Internal(format!("invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .user_agent(concat!("siterake/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(Duration::from_millis(spec.fetch.timeout_ms))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &Url) -> FetchOutcome {
        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => return classify_request_error(url, &e),
        };

        let status = response.status().as_u16();
        let final_url = response.url().clone();

        if let Some(kind) = classify_status(status) {
            return FetchOutcome::failure(kind, format!("HTTP {} for {}", status, url));
        }

        match response.text().await {
            Ok(body) => FetchOutcome::Content {
                body,
                status,
                final_url,
            },
            Err(e) => classify_request_error(url, &e),
        }
    }
}

fn classify_request_error(url: &Url, error: &reqwest::Error) -> FetchOutcome {
    if error.is_timeout() {
        FetchOutcome::failure(FailureKind::Timeout, format!("timeout fetching {}", url))
    } else if error.is_connect() {
        FetchOutcome::failure(
            FailureKind::Connection,
            format!("connection error fetching {}: {}", url, error),
        )
    } else {
        FetchOutcome::failure(
            FailureKind::Connection,
            format!("request error fetching {}: {}", url, error),
        )
    }
}

/// Polymorphic fetch dispatch: one contract, two capabilities.
///
/// The variant is chosen per site at spec-load time; workers only see the
/// shared `fetch` entry point.
pub enum FetchClient {
    Http(HttpFetcher),
    Browser(BrowserSession),
}

impl FetchClient {
    /// Creates the fetch client a spec asks for. Browser sessions are
    /// scoped to one site-run; a crash in one site's session cannot touch
    /// another site's.
    pub async fn for_site(spec: &SiteSpec) -> Result<Self, RakeError> {
        match spec.renderer {
            Renderer::Http => Ok(Self::Http(HttpFetcher::new(spec)?)),
            Renderer::Browser => Ok(Self::Browser(BrowserSession::launch(spec).await?)),
        }
    }

    /// Executes one fetch for the descriptor, classifying every failure
    pub async fn fetch(&self, descriptor: &PageDescriptor, spec: &SiteSpec) -> FetchOutcome {
        let url = match descriptor.resolve(spec) {
            Ok(url) => url,
            Err(e) => {
                return FetchOutcome::failure(
                    FailureKind::MalformedUrl,
                    format!("cannot resolve {}: {}", descriptor, e),
                )
            }
        };

        match self {
            Self::Http(fetcher) => fetcher.fetch(&url).await,
            Self::Browser(session) => session.fetch(&url, descriptor, spec).await,
        }
    }

    /// Releases held resources; a no-op for the static variant
    pub async fn close(self) {
        if let Self::Browser(session) = self {
            session.close().await;
        }
    }
}
