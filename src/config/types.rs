use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One scraping target, loaded from a TOML spec file.
///
/// A spec is immutable once loaded for a run; the engine only ever holds
/// shared references to it.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteSpec {
    /// Unique identifier for this site; also names the output table
    #[serde(rename = "site-name")]
    pub site_name: String,

    /// Base URL, or a URL template containing `{page}` for url-pattern pagination
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Which fetch variant serves this site
    #[serde(default)]
    pub renderer: Renderer,

    #[serde(default)]
    pub pagination: PaginationSpec,

    pub selectors: SelectorSpec,

    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitSpec,

    #[serde(default)]
    pub retry: RetrySpec,

    #[serde(default)]
    pub fetch: FetchSpec,

    #[serde(default)]
    pub browser: BrowserSpec,

    #[serde(default)]
    pub output: OutputSpec,

    /// Optional webhook notified on run failures
    #[serde(default)]
    pub webhook: Option<WebhookSpec>,
}

/// Fetch variant selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Renderer {
    /// Plain HTTP request
    #[default]
    Http,

    /// Headless browser render
    Browser,
}

/// Pagination behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationSpec {
    #[serde(default)]
    pub kind: PaginationKind,

    /// First page number substituted into a url-pattern template
    #[serde(default = "default_start")]
    pub start: u32,

    /// Hard ceiling on pages fetched per run
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,

    /// Placeholder name inside the base URL template
    #[serde(default = "default_param")]
    pub param: String,

    /// Selector for the next-page link (next-button kind)
    #[serde(default)]
    pub selector: Option<String>,

    /// Settle time after each scroll round (infinite-scroll kind)
    #[serde(rename = "scroll-wait-ms", default = "default_scroll_wait")]
    pub scroll_wait_ms: u64,
}

impl Default for PaginationSpec {
    fn default() -> Self {
        Self {
            kind: PaginationKind::default(),
            start: default_start(),
            max_pages: default_max_pages(),
            param: default_param(),
            selector: None,
            scroll_wait_ms: default_scroll_wait(),
        }
    }
}

fn default_start() -> u32 {
    1
}

fn default_max_pages() -> u32 {
    1
}

fn default_param() -> String {
    "page".to_string()
}

fn default_scroll_wait() -> u64 {
    2000
}

/// How the next page is discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PaginationKind {
    /// Single page, no pagination
    #[default]
    None,

    /// Substitute an incrementing page number into the URL template
    UrlPattern,

    /// Follow a "next" link found in the page
    NextButton,

    /// Scroll-triggered content growth in the rendered variant
    InfiniteScroll,
}

impl PaginationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::UrlPattern => "url-pattern",
            Self::NextButton => "next-button",
            Self::InfiniteScroll => "infinite-scroll",
        }
    }
}

impl Renderer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Browser => "browser",
        }
    }
}

/// Container and field selectors for extraction
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorSpec {
    /// Selector delimiting one extracted item's scope
    pub container: String,

    /// Field name to selector configuration
    pub fields: BTreeMap<String, FieldSpec>,
}

/// Selector configuration for a single extracted field
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub selector: String,

    #[serde(default)]
    pub kind: SelectorKind,

    /// Capture this attribute instead of text content
    #[serde(default)]
    pub attr: Option<String>,

    /// Items missing this field are dropped with a warning
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub transform: Option<TransformKind>,

    /// Extraction pattern for the regex transform
    #[serde(default)]
    pub pattern: Option<String>,

    /// Target type for the cast transform
    #[serde(default)]
    pub cast: Option<CastKind>,

    /// Fallback applied last when the value is missing or empty
    #[serde(default)]
    pub default: Option<String>,
}

/// Selector language for a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    #[default]
    Css,

    /// Accepted by the spec surface, rejected at validation
    Xpath,
}

/// Field value transforms, applied after extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    Strip,
    Regex,
    Cast,
}

/// Target type for the cast transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastKind {
    Int,
    Float,
    Bool,
    String,
}

/// Per-site request rate limits
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSpec {
    /// Minimum spacing between permit grants for this site
    #[serde(rename = "delay-ms", default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Maximum simultaneous outstanding permits for this site
    #[serde(rename = "max-concurrent", default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

impl Default for RateLimitSpec {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_max_concurrent() -> u32 {
    1
}

/// Retry and backoff configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySpec {
    /// Total fetch attempts per page, including the first
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(rename = "base-delay-ms", default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(rename = "max-delay-ms", default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Exponential growth factor between attempts
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Fraction of the computed delay added as uniform random jitter
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            factor: default_factor(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_factor() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

/// HTTP request shaping for the static fetch variant
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSpec {
    #[serde(rename = "timeout-ms", default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra headers sent with every request to this site
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for FetchSpec {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            headers: BTreeMap::new(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Rendered fetch options
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSpec {
    /// Readiness condition waited for after navigation
    #[serde(rename = "wait-for", default)]
    pub wait_for: ReadyWhen,

    /// Selector waited for when `wait-for = "selector"`
    #[serde(rename = "wait-selector", default)]
    pub wait_selector: Option<String>,

    /// Fixed settle delay when `wait-for = "delay"`
    #[serde(rename = "delay-ms", default)]
    pub delay_ms: u64,

    /// Ceiling on any single readiness wait
    #[serde(rename = "timeout-ms", default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BrowserSpec {
    fn default() -> Self {
        Self {
            wait_for: ReadyWhen::default(),
            wait_selector: None,
            delay_ms: 0,
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Readiness condition for the rendered variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReadyWhen {
    /// Navigation complete, plus an optional fixed delay
    #[default]
    Delay,

    /// A configured DOM selector is present
    Selector,

    /// No network activity for a settle interval
    NetworkIdle,
}

/// Output destination for extracted items
#[derive(Debug, Clone, Deserialize)]
pub struct OutputSpec {
    /// Directory for per-site databases, or a full `.db` path
    #[serde(default = "default_destination")]
    pub destination: String,

    #[serde(default)]
    pub mode: OutputMode,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            mode: OutputMode::default(),
        }
    }
}

fn default_destination() -> String {
    "./output/".to_string()
}

/// How existing rows for the same site are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Append,
    Overwrite,
}

/// Failure notification target
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSpec {
    pub url: String,
}

/// Engine-level settings, constructed once per run and passed by reference
/// into each component. There is no ambient global configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory scanned for site spec files
    pub specs_dir: PathBuf,

    /// Worker tasks in the pool
    pub workers: usize,

    /// Hard ceiling on requests in flight across all sites
    pub global_concurrency: usize,

    /// Meta database recording run history
    pub history_db: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            specs_dir: PathBuf::from("./specs"),
            workers: 4,
            global_concurrency: 16,
            history_db: PathBuf::from("./output/siterake_meta.db"),
        }
    }
}
