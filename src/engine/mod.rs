//! The scraping engine
//!
//! Leaf-first: the rate limiter and backoff policy govern request pacing,
//! the fetcher executes one network or render operation, the extractor
//! turns content into items plus a pagination signal, the pagination
//! driver decides when a source is exhausted, and the orchestrator wires
//! them together over a bounded worker pool.

pub mod backoff;
pub mod browser;
pub mod extractor;
pub mod fetcher;
pub mod orchestrator;
pub mod paginator;
pub mod rate_limiter;
pub mod transforms;

pub use backoff::BackoffPolicy;
pub use browser::BrowserSession;
pub use extractor::Extractor;
pub use fetcher::{FailureKind, FetchClient, FetchOutcome, HttpFetcher};
pub use orchestrator::{CancelHandle, Orchestrator};
pub use paginator::{PaginationDriver, Step};
pub use rate_limiter::{Permit, RateLimiter};
pub use transforms::FieldPipeline;
