use crate::config::{PaginationKind, SiteSpec};
use crate::RakeError;
use std::fmt;
use url::Url;

/// Identifies one page to fetch for a site.
///
/// Descriptors are the unit of pagination: the driver discovers them one at
/// a time and the orchestrator never fetches the same one twice in a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PageDescriptor {
    /// A fully resolved URL, e.g. from a next-button link
    Url(Url),

    /// A page index substituted into the site's URL template
    Template { page: u32 },

    /// Scroll continuation: re-render the base URL with `round` scroll
    /// passes applied
    Scroll { round: u32 },
}

impl PageDescriptor {
    /// First descriptor for a site, derived from its pagination kind
    pub fn initial(spec: &SiteSpec) -> Self {
        match spec.pagination.kind {
            PaginationKind::UrlPattern => PageDescriptor::Template {
                page: spec.pagination.start,
            },
            PaginationKind::InfiniteScroll => PageDescriptor::Scroll { round: 0 },
            PaginationKind::None | PaginationKind::NextButton => {
                match Url::parse(&spec.base_url) {
                    Ok(url) => PageDescriptor::Url(url),
                    // Validation guarantees the base URL parses; fall back to
                    // the template form so a broken spec still fails loudly at
                    // resolve time instead of panicking here.
                    Err(_) => PageDescriptor::Template { page: 0 },
                }
            }
        }
    }

    /// Resolves the descriptor to the URL that will actually be fetched
    pub fn resolve(&self, spec: &SiteSpec) -> Result<Url, RakeError> {
        match self {
            PageDescriptor::Url(url) => Ok(url.clone()),
            PageDescriptor::Template { page } => {
                let placeholder = format!("{{{}}}", spec.pagination.param);
                let resolved = spec.base_url.replace(&placeholder, &page.to_string());
                Ok(Url::parse(&resolved)?)
            }
            PageDescriptor::Scroll { .. } => Ok(Url::parse(&spec.base_url)?),
        }
    }

    /// Key used for in-run dedupe.
    ///
    /// Keyed on the resolved URL when one exists; scroll continuations are
    /// structurally unique per round, so they key on URL plus round and the
    /// driver relies on the no-growth check and max-pages instead.
    pub fn dedupe_key(&self, spec: &SiteSpec) -> String {
        match self {
            PageDescriptor::Url(url) => url.to_string(),
            PageDescriptor::Template { .. } => self
                .resolve(spec)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| format!("{:?}", self)),
            PageDescriptor::Scroll { round } => format!("{}#scroll-{}", spec.base_url, round),
        }
    }
}

impl fmt::Display for PageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageDescriptor::Url(url) => write!(f, "{}", url),
            PageDescriptor::Template { page } => write!(f, "page {}", page),
            PageDescriptor::Scroll { round } => write!(f, "scroll round {}", round),
        }
    }
}

/// One unit of work on the ready queue: fetch a page for a site
#[derive(Debug, Clone)]
pub struct Job {
    /// Site this job belongs to
    pub site: String,

    pub descriptor: PageDescriptor,

    /// Fetch attempt number, starting at 1
    pub attempt: u32,

    /// Ordinal of this page within the site's run, starting at 1
    pub page_index: u32,
}

impl Job {
    pub fn new(site: &str, descriptor: PageDescriptor, page_index: u32) -> Self {
        Self {
            site: site.to_string(),
            descriptor,
            attempt: 1,
            page_index,
        }
    }

    /// Same job, next attempt; used when a transient failure is retried
    pub fn retried(&self) -> Self {
        Self {
            site: self.site.clone(),
            descriptor: self.descriptor.clone(),
            attempt: self.attempt + 1,
            page_index: self.page_index,
        }
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// On the ready queue, not yet picked up
    Pending,

    /// A worker is fetching it
    InFlight,

    /// Fetched and extracted
    Succeeded,

    /// Fatal failure, no retry
    Failed,

    /// Retries exhausted on a transient failure
    Exhausted,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Exhausted)
    }
}
