use chrono::{DateTime, Utc};
use std::fmt;

/// Why a site's pagination ended.
///
/// Reached exactly once per site-run; the reason is recorded in run
/// history and surfaced in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// The source reported no more pages
    Exhausted,

    /// The configured max-pages ceiling was hit
    MaxPages,

    /// A descriptor repeated; a misconfigured next selector would loop
    CycleDetected,

    /// Selector evaluation failed or every item lacked a required field
    ExtractionError,

    /// A page failed fatally or its retries were exhausted
    PageFailed,

    /// The run-level cancellation signal fired
    Cancelled,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::MaxPages => "max_pages",
            Self::CycleDetected => "cycle_detected",
            Self::ExtractionError => "extraction_error",
            Self::PageFailed => "page_failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses the database representation back into a reason
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "exhausted" => Some(Self::Exhausted),
            "max_pages" => Some(Self::MaxPages),
            "cycle_detected" => Some(Self::CycleDetected),
            "extraction_error" => Some(Self::ExtractionError),
            "page_failed" => Some(Self::PageFailed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// A normal end of pagination, as opposed to a failure
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exhausted | Self::MaxPages)
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one site's run, aggregated by the orchestrator
#[derive(Debug, Clone)]
pub struct SiteOutcome {
    pub site_name: String,
    pub terminal: TerminalReason,
    pub pages_fetched: u32,
    pub items_extracted: u64,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SiteOutcome {
    pub fn succeeded(&self) -> bool {
        self.terminal.is_success() && self.errors.is_empty()
    }
}

/// Summary over all sites in a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total_sites: usize,
    pub sites_succeeded: usize,
    pub sites_failed: usize,
    pub total_items: u64,
    pub total_errors: usize,
    pub duration_secs: f64,
    pub outcomes: Vec<SiteOutcome>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: Vec<SiteOutcome>, duration_secs: f64) -> Self {
        let total_sites = outcomes.len();
        let sites_succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        let total_items = outcomes.iter().map(|o| o.items_extracted).sum();
        let total_errors = outcomes.iter().map(|o| o.errors.len()).sum();

        Self {
            total_sites,
            sites_succeeded,
            sites_failed: total_sites - sites_succeeded,
            total_items,
            total_errors,
            duration_secs,
            outcomes,
        }
    }

    /// Multi-line report printed at the end of a run
    pub fn format_report(&self) -> String {
        let mut lines = vec![
            "========== Siterake Run Summary ==========".to_string(),
            format!("Duration:        {:.1}s", self.duration_secs),
            format!("Sites Attempted: {}", self.total_sites),
            format!("Sites Succeeded: {}", self.sites_succeeded),
            format!("Sites Failed:    {}", self.sites_failed),
            format!("Total Items:     {}", self.total_items),
            String::new(),
            "Per-Site Results:".to_string(),
        ];

        for outcome in &self.outcomes {
            let mark = if outcome.succeeded() { "✓" } else { "✗" };
            if let Some(first_error) = outcome.errors.first() {
                lines.push(format!(
                    "    {} {:<15} — {} ({})",
                    mark, outcome.site_name, first_error, outcome.terminal
                ));
            } else {
                lines.push(format!(
                    "    {} {:<15} — {} items over {} pages ({})",
                    mark,
                    outcome.site_name,
                    outcome.items_extracted,
                    outcome.pages_fetched,
                    outcome.terminal
                ));
            }
        }

        lines.push("==========================================".to_string());
        lines.join("\n")
    }
}
