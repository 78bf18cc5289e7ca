//! Pagination state machine
//!
//! One driver per site-run decides, after each page's extraction, whether
//! another page is fetched or the run ends. Two guards protect against
//! misconfigured sources: a hard max-pages ceiling, and a dedupe set of
//! already-seen descriptors that turns a repeating "next" target into
//! `cycle_detected` instead of an endless loop. Terminal is reached
//! exactly once and is irreversible.

use crate::config::{PaginationKind, SiteSpec};
use crate::state::{Job, NextSignal, PageOutcome, TerminalReason};
use std::collections::HashSet;
use std::sync::Arc;

/// Where a site-run currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Start,
    Fetching,
    Terminal(TerminalReason),
}

/// What the orchestrator should do next for this site
#[derive(Debug, Clone)]
pub enum Step {
    /// Enqueue this job
    Fetch(Job),

    /// The site-run is over
    Terminal(TerminalReason),
}

/// Per-site pagination state machine
pub struct PaginationDriver {
    spec: Arc<SiteSpec>,
    state: DriverState,
    seen: HashSet<String>,
    pages_fetched: u32,
    items_total: u64,
}

impl PaginationDriver {
    pub fn new(spec: Arc<SiteSpec>) -> Self {
        Self {
            spec,
            state: DriverState::Start,
            seen: HashSet::new(),
            pages_fetched: 0,
            items_total: 0,
        }
    }

    /// Produces the first job of the run
    pub fn start(&mut self) -> Step {
        if self.state != DriverState::Start {
            tracing::error!(
                "Pagination driver for {} started twice",
                self.spec.site_name
            );
            return Step::Terminal(self.terminal().unwrap_or(TerminalReason::ExtractionError));
        }

        let descriptor = crate::state::PageDescriptor::initial(&self.spec);
        self.seen.insert(descriptor.dedupe_key(&self.spec));
        self.state = DriverState::Fetching;
        Step::Fetch(Job::new(&self.spec.site_name, descriptor, 1))
    }

    /// Items extracted so far; infinite scroll uses this to detect
    /// no-growth rounds
    pub fn items_total(&self) -> u64 {
        self.items_total
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn terminal(&self) -> Option<TerminalReason> {
        match self.state {
            DriverState::Terminal(reason) => Some(reason),
            _ => None,
        }
    }

    /// Consumes a page's outcome and decides the next step.
    ///
    /// Guard order matters: the max-pages ceiling applies regardless of
    /// the signal, and the dedupe set is consulted before any new job is
    /// produced.
    pub fn on_outcome(&mut self, outcome: &PageOutcome) -> Step {
        if let DriverState::Terminal(reason) = self.state {
            tracing::error!(
                "Outcome delivered to {} after terminal state {}",
                self.spec.site_name,
                reason
            );
            return Step::Terminal(reason);
        }

        self.pages_fetched += 1;
        self.items_total += outcome.items.len() as u64;

        // Ceiling first: it holds even when the page signalled more. A
        // single-page source (kind none) is exhausted, not capped.
        if self.spec.pagination.kind != PaginationKind::None
            && self.pages_fetched >= self.spec.pagination.max_pages
        {
            return self.finish(TerminalReason::MaxPages);
        }

        match &outcome.next {
            NextSignal::Error(message) => {
                tracing::warn!(
                    "Extraction error ends pagination for {}: {}",
                    self.spec.site_name,
                    message
                );
                self.finish(TerminalReason::ExtractionError)
            }
            NextSignal::NoMore => self.finish(TerminalReason::Exhausted),
            NextSignal::Next(descriptor) => {
                let key = descriptor.dedupe_key(&self.spec);
                if !self.seen.insert(key) {
                    tracing::warn!(
                        "Descriptor {} repeated for {}; stopping before a loop",
                        descriptor,
                        self.spec.site_name
                    );
                    return self.finish(TerminalReason::CycleDetected);
                }

                self.state = DriverState::Fetching;
                Step::Fetch(Job::new(
                    &self.spec.site_name,
                    descriptor.clone(),
                    self.pages_fetched + 1,
                ))
            }
        }
    }

    /// Ends the run for a page-level failure (fatal fetch, exhausted
    /// retries) or cancellation
    pub fn on_failure(&mut self, reason: TerminalReason) -> Step {
        if let DriverState::Terminal(existing) = self.state {
            return Step::Terminal(existing);
        }
        self.finish(reason)
    }

    fn finish(&mut self, reason: TerminalReason) -> Step {
        self.state = DriverState::Terminal(reason);
        Step::Terminal(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::create_test_spec;
    use crate::state::{ExtractedItem, PageDescriptor, Provenance};
    use chrono::Utc;

    fn create_test_outcome(item_count: usize, next: NextSignal) -> PageOutcome {
        let items = (0..item_count)
            .map(|i| ExtractedItem {
                fields: [("title".to_string(), format!("item {}", i))].into(),
                provenance: Provenance {
                    site_name: "test-site".to_string(),
                    source_url: "https://example.com/list".to_string(),
                    page: "page 1".to_string(),
                    fetched_at: Utc::now(),
                },
            })
            .collect();
        PageOutcome {
            items,
            dropped: 0,
            next,
        }
    }

    fn url_pattern_driver(max_pages: u32) -> PaginationDriver {
        let mut spec = create_test_spec();
        spec.base_url = "https://example.com/list?page={page}".to_string();
        spec.pagination.kind = PaginationKind::UrlPattern;
        spec.pagination.max_pages = max_pages;
        PaginationDriver::new(Arc::new(spec))
    }

    #[test]
    fn test_start_produces_initial_job() {
        let mut driver = url_pattern_driver(5);
        match driver.start() {
            Step::Fetch(job) => {
                assert_eq!(job.site, "test-site");
                assert_eq!(job.page_index, 1);
                assert_eq!(job.attempt, 1);
                assert_eq!(job.descriptor, PageDescriptor::Template { page: 1 });
            }
            Step::Terminal(_) => panic!("expected a job"),
        }
    }

    #[test]
    fn test_max_pages_ceiling_wins_over_next_signal() {
        let mut driver = url_pattern_driver(3);
        driver.start();

        for page in 2..=3 {
            let outcome = create_test_outcome(
                2,
                NextSignal::Next(PageDescriptor::Template { page }),
            );
            assert!(matches!(driver.on_outcome(&outcome), Step::Fetch(_)));
        }

        // Third page extracted; the ceiling ends the run even though the
        // page reported another descriptor.
        let outcome = create_test_outcome(
            2,
            NextSignal::Next(PageDescriptor::Template { page: 4 }),
        );
        match driver.on_outcome(&outcome) {
            Step::Terminal(reason) => assert_eq!(reason, TerminalReason::MaxPages),
            Step::Fetch(_) => panic!("ceiling must end the run"),
        }

        assert_eq!(driver.pages_fetched(), 3);
        assert_eq!(driver.items_total(), 6);
    }

    #[test]
    fn test_no_more_exhausts() {
        let mut driver = url_pattern_driver(10);
        driver.start();

        let outcome = create_test_outcome(2, NextSignal::NoMore);
        match driver.on_outcome(&outcome) {
            Step::Terminal(reason) => assert_eq!(reason, TerminalReason::Exhausted),
            Step::Fetch(_) => panic!("expected terminal"),
        }
    }

    #[test]
    fn test_repeated_descriptor_detects_cycle() {
        let mut spec = create_test_spec();
        spec.pagination.kind = PaginationKind::NextButton;
        spec.pagination.selector = Some("a.next".to_string());
        spec.pagination.max_pages = 100;
        let mut driver = PaginationDriver::new(Arc::new(spec));
        driver.start();

        // The "next" selector keeps pointing at the page we started on
        let looping = PageDescriptor::Url(url::Url::parse("https://example.com/list").unwrap());
        let outcome = create_test_outcome(2, NextSignal::Next(looping));

        match driver.on_outcome(&outcome) {
            Step::Terminal(reason) => assert_eq!(reason, TerminalReason::CycleDetected),
            Step::Fetch(_) => panic!("repeat descriptor must end the run"),
        }
    }

    #[test]
    fn test_extraction_error_signal() {
        let mut driver = url_pattern_driver(10);
        driver.start();

        let outcome = create_test_outcome(0, NextSignal::Error("bad selector".to_string()));
        match driver.on_outcome(&outcome) {
            Step::Terminal(reason) => assert_eq!(reason, TerminalReason::ExtractionError),
            Step::Fetch(_) => panic!("expected terminal"),
        }
    }

    #[test]
    fn test_single_page_source_is_exhausted_not_capped() {
        let spec = create_test_spec(); // kind none, max-pages 1
        let mut driver = PaginationDriver::new(Arc::new(spec));
        driver.start();

        let outcome = create_test_outcome(3, NextSignal::NoMore);
        match driver.on_outcome(&outcome) {
            Step::Terminal(reason) => assert_eq!(reason, TerminalReason::Exhausted),
            Step::Fetch(_) => panic!("expected terminal"),
        }
    }

    #[test]
    fn test_terminal_is_sticky() {
        let mut driver = url_pattern_driver(10);
        driver.start();

        let outcome = create_test_outcome(0, NextSignal::NoMore);
        assert!(matches!(
            driver.on_outcome(&outcome),
            Step::Terminal(TerminalReason::Exhausted)
        ));

        // A stray late outcome cannot resurrect or re-terminate the run
        let late = create_test_outcome(
            5,
            NextSignal::Next(PageDescriptor::Template { page: 9 }),
        );
        assert!(matches!(
            driver.on_outcome(&late),
            Step::Terminal(TerminalReason::Exhausted)
        ));
        assert_eq!(driver.pages_fetched(), 1);
    }

    #[test]
    fn test_page_failure_terminates() {
        let mut driver = url_pattern_driver(10);
        driver.start();

        match driver.on_failure(TerminalReason::PageFailed) {
            Step::Terminal(reason) => assert_eq!(reason, TerminalReason::PageFailed),
            Step::Fetch(_) => panic!("expected terminal"),
        }

        // First reason sticks
        assert!(matches!(
            driver.on_failure(TerminalReason::Cancelled),
            Step::Terminal(TerminalReason::PageFailed)
        ));
    }
}
