//! Structured engine events
//!
//! The orchestrator emits one event per notable transition. Events are
//! advisory: sinks observe them for logging or notification, but they
//! never gate control flow.

use crate::state::TerminalReason;
use std::time::Duration;

/// Everything the engine reports about a run in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    JobStarted {
        site: String,
        page: String,
        attempt: u32,
    },

    JobRetried {
        site: String,
        page: String,
        attempt: u32,
        delay: Duration,
    },

    JobFailed {
        site: String,
        page: String,
        kind: String,
    },

    PageExtracted {
        site: String,
        page: String,
        count: usize,
    },

    SiteTerminal {
        site: String,
        reason: TerminalReason,
    },
}

/// Observer for engine events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EngineEvent);
}

/// Default observer: forwards events to tracing
pub struct LogEvents;

impl EventSink for LogEvents {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::JobStarted {
                site,
                page,
                attempt,
            } => {
                tracing::debug!(site = %site, page = %page, attempt, "job started");
            }
            EngineEvent::JobRetried {
                site,
                page,
                attempt,
                delay,
            } => {
                tracing::info!(site = %site, page = %page, attempt, ?delay, "job retried");
            }
            EngineEvent::JobFailed { site, page, kind } => {
                tracing::warn!(site = %site, page = %page, kind = %kind, "job failed");
            }
            EngineEvent::PageExtracted { site, page, count } => {
                tracing::info!(site = %site, page = %page, count, "page extracted");
            }
            EngineEvent::SiteTerminal { site, reason } => {
                tracing::info!(site = %site, reason = reason.as_str(), "site terminal");
            }
        }
    }
}

/// Buffers events for inspection; used by tests
#[derive(Default)]
pub struct CollectingEvents {
    events: std::sync::Mutex<Vec<EngineEvent>>,
}

impl CollectingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectingEvents {
    fn emit(&self, event: &EngineEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
