//! Siterake: a declarative scraping engine for paginated web sources
//!
//! This crate turns per-site TOML specifications into bounded sequences of
//! fetch/extract/paginate cycles, respecting per-site rate limits, retrying
//! transient failures with backoff, and persisting extracted records with
//! provenance.

pub mod config;
pub mod engine;
pub mod events;
pub mod history;
pub mod notify;
pub mod sink;
pub mod state;

use thiserror::Error;

/// Main error type for Siterake operations
#[derive(Debug, Error)]
pub enum RakeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Extraction error for site {site}: {message}")]
    Extraction { site: String, message: String },

    #[error("Sink error: {0}")]
    Sink(#[from] sink::SinkError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine invariant violated: {0}")]
    Internal(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read spec file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in spec: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("No spec found for site: {0}")]
    UnknownSite(String),
}

/// Result type alias for Siterake operations
pub type Result<T> = std::result::Result<T, RakeError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{EngineConfig, SiteSpec};
pub use engine::Orchestrator;
pub use state::{Job, JobState, PageDescriptor, TerminalReason};
