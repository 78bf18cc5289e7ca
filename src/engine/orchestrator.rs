//! Job orchestration
//!
//! The orchestrator owns the worker pool. Jobs flow through a shared
//! ready queue; workers are interchangeable across sites, but within one
//! site pages stay strictly sequential because the next descriptor is
//! only known after the current page is extracted. Transient failures
//! re-enqueue the same job with an incremented attempt count after the
//! backoff delay; fatal failures and exhausted retries end that site's
//! run without touching any other site.

use crate::config::{EngineConfig, LoadedSpec, SiteSpec};
use crate::engine::backoff::BackoffPolicy;
use crate::engine::extractor::Extractor;
use crate::engine::fetcher::{FetchClient, FetchOutcome};
use crate::engine::paginator::{PaginationDriver, Step};
use crate::engine::rate_limiter::RateLimiter;
use crate::events::{EngineEvent, EventSink, LogEvents};
use crate::history::{RunHistoryStore, RunRecord};
use crate::notify::Notifier;
use crate::sink::ResultSink;
use crate::state::{Job, RunSummary, SiteOutcome, TerminalReason};
use crate::RakeError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch};

/// Messages on the ready queue
enum QueueMsg {
    Run(Job),
    Shutdown,
}

/// Cancels a running orchestrator from another task
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Stops issuing new fetches; in-flight fetches finish, still-active
    /// sites end with reason `cancelled`, and already-written items stay
    /// in the sink.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Everything a site-run owns
struct SiteRuntime {
    spec: Arc<SiteSpec>,
    spec_hash: String,
    driver: Mutex<PaginationDriver>,
    extractor: Extractor,
    backoff: BackoffPolicy,
    fetcher: tokio::sync::Mutex<Option<Arc<FetchClient>>>,
    errors: Mutex<Vec<String>>,
    started_at: chrono::DateTime<chrono::Utc>,
    finalized: AtomicBool,
}

impl SiteRuntime {
    fn record_error(&self, error: impl Into<String>) {
        self.errors.lock().unwrap().push(error.into());
    }
}

/// State shared by every worker in a run
struct RunContext {
    sink: Arc<Mutex<Box<dyn ResultSink>>>,
    events: Arc<dyn EventSink>,
    history: Option<RunHistoryStore>,
    notifier: Notifier,
    limiter: RateLimiter,
    sites: HashMap<String, Arc<SiteRuntime>>,
    queue_tx: mpsc::UnboundedSender<QueueMsg>,
    remaining: AtomicUsize,
    outcomes: Mutex<Vec<SiteOutcome>>,
    workers: usize,
    cancel: watch::Receiver<bool>,
}

/// Runs every active site's fetch/extract/paginate cycles to a terminal
/// state
pub struct Orchestrator {
    config: EngineConfig,
    specs: Vec<LoadedSpec>,
    sink: Arc<Mutex<Box<dyn ResultSink>>>,
    events: Arc<dyn EventSink>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, specs: Vec<LoadedSpec>, sink: Box<dyn ResultSink>) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            config,
            specs,
            sink: Arc::new(Mutex::new(sink)),
            events: Arc::new(LogEvents),
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        }
    }

    /// Replaces the default tracing-backed event sink
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Processes every site to its terminal state and returns the run
    /// summary.
    pub async fn run(self) -> Result<RunSummary, RakeError> {
        let start = Instant::now();
        let history = match RunHistoryStore::new(&self.config.history_db) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!("Run history unavailable: {}", e);
                None
            }
        };

        let limiter = RateLimiter::new(self.config.global_concurrency);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let mut sites = HashMap::new();
        let mut failed_setups: Vec<SiteOutcome> = Vec::new();

        for loaded in &self.specs {
            let spec = Arc::new(loaded.spec.clone());
            let started_at = Utc::now();

            let setup = Extractor::compile(&spec).map_err(RakeError::Config).and_then(|extractor| {
                self.sink
                    .lock()
                    .unwrap()
                    .register_site(&spec)
                    .map_err(RakeError::Sink)?;
                Ok(extractor)
            });

            match setup {
                Ok(extractor) => {
                    limiter.register(&spec.site_name, &spec.rate_limit);
                    sites.insert(
                        spec.site_name.clone(),
                        Arc::new(SiteRuntime {
                            spec_hash: loaded.hash.clone(),
                            driver: Mutex::new(PaginationDriver::new(Arc::clone(&spec))),
                            extractor,
                            backoff: BackoffPolicy::from_spec(&spec.retry),
                            fetcher: tokio::sync::Mutex::new(None),
                            errors: Mutex::new(Vec::new()),
                            started_at,
                            finalized: AtomicBool::new(false),
                            spec,
                        }),
                    );
                }
                Err(e) => {
                    // Setup failure is contained to this site
                    tracing::error!("Cannot set up site {}: {}", spec.site_name, e);
                    failed_setups.push(SiteOutcome {
                        site_name: spec.site_name.clone(),
                        terminal: TerminalReason::PageFailed,
                        pages_fetched: 0,
                        items_extracted: 0,
                        errors: vec![e.to_string()],
                        started_at,
                        finished_at: Utc::now(),
                    });
                }
            }
        }

        let ctx = Arc::new(RunContext {
            sink: Arc::clone(&self.sink),
            events: Arc::clone(&self.events),
            history,
            notifier: Notifier::new(),
            limiter,
            sites,
            queue_tx: queue_tx.clone(),
            remaining: AtomicUsize::new(0),
            outcomes: Mutex::new(failed_setups),
            workers: self.config.workers,
            cancel: self.cancel_rx.clone(),
        });

        // Seed the queue with each site's first job
        ctx.remaining.store(ctx.sites.len(), Ordering::SeqCst);
        if ctx.sites.is_empty() {
            // Nothing to do; release the workers immediately
            for _ in 0..self.config.workers {
                let _ = queue_tx.send(QueueMsg::Shutdown);
            }
        } else {
            for site in ctx.sites.values() {
                let step = site.driver.lock().unwrap().start();
                match step {
                    Step::Fetch(job) => {
                        let _ = queue_tx.send(QueueMsg::Run(job));
                    }
                    Step::Terminal(reason) => {
                        finalize_site(&ctx, site, reason).await;
                    }
                }
            }
        }

        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let mut workers = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let ctx = Arc::clone(&ctx);
            let queue_rx = Arc::clone(&queue_rx);
            workers.push(tokio::spawn(worker_loop(id, ctx, queue_rx)));
        }

        for worker in workers {
            if let Err(e) = worker.await {
                return Err(RakeError::Internal(format!("worker panicked: {}", e)));
            }
        }

        // Drain-before-exit: nothing buffered may be lost on a normal
        // shutdown, cancelled or not
        self.sink
            .lock()
            .unwrap()
            .flush()
            .map_err(RakeError::Sink)?;

        let outcomes = std::mem::take(&mut *ctx.outcomes.lock().unwrap());
        let summary = RunSummary::from_outcomes(outcomes, start.elapsed().as_secs_f64());

        self.send_summary_webhooks(&ctx, &summary).await;
        tracing::info!(
            "Run complete: {}/{} sites succeeded, {} items in {:.1}s",
            summary.sites_succeeded,
            summary.total_sites,
            summary.total_items,
            summary.duration_secs
        );

        Ok(summary)
    }

    async fn send_summary_webhooks(&self, ctx: &RunContext, summary: &RunSummary) {
        let mut seen = std::collections::HashSet::new();
        for site in ctx.sites.values() {
            if let Some(webhook) = &site.spec.webhook {
                if seen.insert(webhook.url.clone()) {
                    ctx.notifier.send_summary(webhook, summary).await;
                }
            }
        }
    }
}

async fn worker_loop(
    id: usize,
    ctx: Arc<RunContext>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueueMsg>>>,
) {
    loop {
        let msg = {
            let mut rx = queue_rx.lock().await;
            rx.recv().await
        };

        match msg {
            None | Some(QueueMsg::Shutdown) => {
                tracing::trace!("Worker {} exiting", id);
                break;
            }
            Some(QueueMsg::Run(job)) => {
                process_job(&ctx, job).await;
            }
        }
    }
}

async fn process_job(ctx: &Arc<RunContext>, job: Job) {
    let site = match ctx.sites.get(&job.site) {
        Some(site) => Arc::clone(site),
        None => {
            tracing::error!("Job for unknown site {} dropped", job.site);
            return;
        }
    };

    if is_cancelled(ctx) {
        finalize_site(ctx, &site, TerminalReason::Cancelled).await;
        return;
    }

    ctx.events.emit(&EngineEvent::JobStarted {
        site: job.site.clone(),
        page: job.descriptor.to_string(),
        attempt: job.attempt,
    });

    // Lazily create the site's fetch client: HTTP clients are cheap, but
    // a browser session should only launch once the site actually runs
    let fetcher = {
        let mut slot = site.fetcher.lock().await;
        match &*slot {
            Some(fetcher) => Arc::clone(fetcher),
            None => match FetchClient::for_site(&site.spec).await {
                Ok(fetcher) => {
                    let fetcher = Arc::new(fetcher);
                    *slot = Some(Arc::clone(&fetcher));
                    fetcher
                }
                Err(e) => {
                    drop(slot);
                    site.record_error(format!("fetch client setup failed: {}", e));
                    finalize_site(ctx, &site, TerminalReason::PageFailed).await;
                    return;
                }
            },
        }
    };

    let mut cancel = ctx.cancel.clone();
    let permit = tokio::select! {
        permit = ctx.limiter.acquire(&job.site) => match permit {
            Ok(permit) => permit,
            Err(e) => {
                site.record_error(e.to_string());
                finalize_site(ctx, &site, TerminalReason::PageFailed).await;
                return;
            }
        },
        _ = wait_cancelled(&mut cancel) => {
            finalize_site(ctx, &site, TerminalReason::Cancelled).await;
            return;
        }
    };

    if is_cancelled(ctx) {
        drop(permit);
        finalize_site(ctx, &site, TerminalReason::Cancelled).await;
        return;
    }

    let outcome = fetcher.fetch(&job.descriptor, &site.spec).await;
    drop(permit);

    match outcome {
        FetchOutcome::Content {
            body, final_url, ..
        } => {
            let prior_items = site.driver.lock().unwrap().items_total() as usize;
            let page_outcome =
                site.extractor
                    .extract(&body, &job.descriptor, &final_url, &site.spec, prior_items);

            ctx.events.emit(&EngineEvent::PageExtracted {
                site: job.site.clone(),
                page: job.descriptor.to_string(),
                count: page_outcome.items.len(),
            });

            if !page_outcome.items.is_empty() {
                let written = ctx
                    .sink
                    .lock()
                    .unwrap()
                    .write(&job.site, &page_outcome.items);
                if let Err(e) = written {
                    site.record_error(format!("sink write failed: {}", e));
                    finalize_site(ctx, &site, TerminalReason::PageFailed).await;
                    return;
                }
            }

            let step = site.driver.lock().unwrap().on_outcome(&page_outcome);
            match step {
                Step::Fetch(next) => {
                    if ctx.queue_tx.send(QueueMsg::Run(next)).is_err() {
                        tracing::error!("Ready queue closed with site {} active", job.site);
                    }
                }
                Step::Terminal(reason) => {
                    finalize_site(ctx, &site, reason).await;
                }
            }
        }

        FetchOutcome::Transient { kind, message } => {
            if site.backoff.is_retryable(kind, job.attempt) {
                let delay = site.backoff.next_delay(job.attempt);
                ctx.events.emit(&EngineEvent::JobRetried {
                    site: job.site.clone(),
                    page: job.descriptor.to_string(),
                    attempt: job.attempt,
                    delay,
                });
                tracing::warn!(
                    "Transient failure for {} ({}): {}; retrying in {:?}",
                    job.site,
                    job.descriptor,
                    message,
                    delay
                );

                // Re-enqueue after the delay on a side task so the worker
                // stays free for other sites
                let ctx = Arc::clone(ctx);
                let retried = job.retried();
                tokio::spawn(async move {
                    let mut cancel = ctx.cancel.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            let _ = ctx.queue_tx.send(QueueMsg::Run(retried));
                        }
                        _ = wait_cancelled(&mut cancel) => {
                            if let Some(site) = ctx.sites.get(&retried.site) {
                                let site = Arc::clone(site);
                                finalize_site(&ctx, &site, TerminalReason::Cancelled).await;
                            }
                        }
                    }
                });
            } else {
                site.record_error(format!(
                    "retries exhausted after attempt {}: {}",
                    job.attempt, message
                ));
                ctx.events.emit(&EngineEvent::JobFailed {
                    site: job.site.clone(),
                    page: job.descriptor.to_string(),
                    kind: kind.as_str().to_string(),
                });
                finalize_site(ctx, &site, TerminalReason::PageFailed).await;
            }
        }

        FetchOutcome::Fatal { kind, message } => {
            site.record_error(message.clone());
            ctx.events.emit(&EngineEvent::JobFailed {
                site: job.site.clone(),
                page: job.descriptor.to_string(),
                kind: kind.as_str().to_string(),
            });
            tracing::warn!("Fatal failure for {} ({}): {}", job.site, job.descriptor, message);
            finalize_site(ctx, &site, TerminalReason::PageFailed).await;
        }
    }
}

/// Ends one site's run exactly once: marks the driver terminal, records
/// history, notifies, releases the fetch client, and shuts the pool down
/// when it was the last site standing.
async fn finalize_site(ctx: &Arc<RunContext>, site: &Arc<SiteRuntime>, reason: TerminalReason) {
    if site.finalized.swap(true, Ordering::SeqCst) {
        return;
    }

    let terminal = {
        let mut driver = site.driver.lock().unwrap();
        if driver.terminal().is_none() {
            driver.on_failure(reason);
        }
        driver.terminal().unwrap_or(reason)
    };

    let (pages_fetched, items_extracted) = {
        let driver = site.driver.lock().unwrap();
        (driver.pages_fetched(), driver.items_total())
    };

    let outcome = SiteOutcome {
        site_name: site.spec.site_name.clone(),
        terminal,
        pages_fetched,
        items_extracted,
        errors: std::mem::take(&mut *site.errors.lock().unwrap()),
        started_at: site.started_at,
        finished_at: Utc::now(),
    };

    ctx.events.emit(&EngineEvent::SiteTerminal {
        site: outcome.site_name.clone(),
        reason: terminal,
    });
    tracing::info!(
        "Site {} terminal: {} ({} pages, {} items)",
        outcome.site_name,
        terminal,
        outcome.pages_fetched,
        outcome.items_extracted
    );

    // Browser sessions must be released on every exit path
    if let Some(fetcher) = site.fetcher.lock().await.take() {
        match Arc::try_unwrap(fetcher) {
            Ok(fetcher) => fetcher.close().await,
            Err(_) => tracing::debug!(
                "Fetch client for {} still shared at finalize; dropping handle",
                outcome.site_name
            ),
        }
    }

    // History and notifications are advisory: failures never fail the run
    if let Some(history) = &ctx.history {
        let record = RunRecord::from_outcome(&outcome, &site.spec_hash);
        if let Err(e) = history.record_run(&record) {
            tracing::warn!("Could not record run history for {}: {}", outcome.site_name, e);
        }
    }

    if let Some(webhook) = &site.spec.webhook {
        if !outcome.succeeded() {
            ctx.notifier.send_failure(webhook, &outcome).await;
        }
    }

    ctx.outcomes.lock().unwrap().push(outcome);

    if ctx.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
        for _ in 0..ctx.workers {
            let _ = ctx.queue_tx.send(QueueMsg::Shutdown);
        }
    }
}

fn is_cancelled(ctx: &RunContext) -> bool {
    *ctx.cancel.borrow()
}

/// Resolves once the run-level cancellation signal fires
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            // Sender gone without cancelling: park forever, the other
            // select arm decides
            std::future::pending::<()>().await;
        }
    }
}
