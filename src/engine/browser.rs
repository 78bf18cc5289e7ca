//! Rendered fetch variant
//!
//! Drives a headless Chromium session through chromiumoxide. One session
//! is launched per site-run, so a crashed session only ever takes down
//! its own site. The session is released on every exit path, with a Drop
//! fallback for paths that never reach the explicit close.

use crate::config::{ReadyWhen, SiteSpec};
use crate::engine::fetcher::{FailureKind, FetchOutcome};
use crate::state::PageDescriptor;
use crate::RakeError;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use url::Url;

/// A per-site headless browser session
pub struct BrowserSession {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    closed: bool,
}

impl BrowserSession {
    /// Launches a headless browser for one site-run.
    ///
    /// The CDP event handler runs on its own task until the session
    /// closes; without it every page command would stall.
    pub async fn launch(spec: &SiteSpec) -> Result<Self, RakeError> {
        let config = BrowserConfig::builder()
            .build()
            .map_err(RakeError::Browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RakeError::Browser(format!("launch failed: {}", e)))?;

        let site = spec.site_name.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!("Browser handler for {} stopped: {}", site, e);
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
            closed: false,
        })
    }

    /// Renders one page and returns its post-render DOM
    pub async fn fetch(&self, url: &Url, descriptor: &PageDescriptor, spec: &SiteSpec) -> FetchOutcome {
        let page = match self.browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                return FetchOutcome::failure(
                    FailureKind::Render,
                    format!("cannot open page for {}: {}", url, e),
                )
            }
        };

        let outcome = self.render(&page, url, descriptor, spec).await;

        // Pages leak CDP resources if not closed explicitly
        if let Err(e) = page.close().await {
            tracing::warn!("Failed to close page for {}: {}", url, e);
        }

        outcome
    }

    async fn render(
        &self,
        page: &Page,
        url: &Url,
        descriptor: &PageDescriptor,
        spec: &SiteSpec,
    ) -> FetchOutcome {
        let wait_budget = Duration::from_millis(spec.browser.timeout_ms);

        let navigation = tokio::time::timeout(wait_budget, async {
            page.goto(url.as_str()).await?;
            page.wait_for_navigation().await?;
            Ok::<(), chromiumoxide::error::CdpError>(())
        })
        .await;

        match navigation {
            Err(_) => {
                return FetchOutcome::failure(
                    FailureKind::Timeout,
                    format!("navigation timeout for {}", url),
                )
            }
            Ok(Err(e)) => {
                return FetchOutcome::failure(
                    FailureKind::Render,
                    format!("navigation failed for {}: {}", url, e),
                )
            }
            Ok(Ok(())) => {}
        }

        if let Some(failure) = self.await_readiness(page, url, spec).await {
            return failure;
        }

        // Scroll continuations re-render the same URL with N scroll passes
        if let PageDescriptor::Scroll { round } = descriptor {
            for _ in 0..*round {
                if let Err(e) = page
                    .evaluate("window.scrollTo(0, document.body.scrollHeight)")
                    .await
                {
                    return FetchOutcome::failure(
                        FailureKind::Render,
                        format!("scroll failed for {}: {}", url, e),
                    );
                }
                tokio::time::sleep(Duration::from_millis(spec.pagination.scroll_wait_ms)).await;
            }
        }

        match page.content().await {
            Ok(body) => FetchOutcome::Content {
                body,
                // CDP does not surface the HTTP status here; a page that
                // rendered is treated as a 200 like the static variant's
                // success path.
                status: 200,
                final_url: url.clone(),
            },
            Err(e) => FetchOutcome::failure(
                FailureKind::Render,
                format!("cannot read content of {}: {}", url, e),
            ),
        }
    }

    /// Waits for the configured readiness condition, returning a failure
    /// outcome if the wait cannot be satisfied in time
    async fn await_readiness(&self, page: &Page, url: &Url, spec: &SiteSpec) -> Option<FetchOutcome> {
        let budget = Duration::from_millis(spec.browser.timeout_ms);

        match spec.browser.wait_for {
            ReadyWhen::Delay => {
                if spec.browser.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(spec.browser.delay_ms)).await;
                }
                None
            }
            ReadyWhen::NetworkIdle => {
                // Approximation: navigation has completed above, give
                // late XHR-driven content a settle interval.
                tokio::time::sleep(Duration::from_millis(500)).await;
                None
            }
            ReadyWhen::Selector => {
                let selector = spec.browser.wait_selector.as_deref().unwrap_or("body");
                let found = tokio::time::timeout(budget, async {
                    loop {
                        if page.find_element(selector).await.is_ok() {
                            return;
                        }
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                })
                .await;

                match found {
                    Ok(()) => None,
                    Err(_) => Some(FetchOutcome::failure(
                        FailureKind::Timeout,
                        format!("selector '{}' never appeared on {}", selector, url),
                    )),
                }
            }
        }
    }

    /// Closes the session, shutting down the browser process and its
    /// handler task
    pub async fn close(mut self) {
        self.closed = true;
        if let Err(e) = self.browser.close().await {
            tracing::warn!("Browser close failed: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            tracing::debug!("Browser wait after close failed: {}", e);
        }
        self.handler_task.abort();
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        // Fallback for exit paths that skipped close(); the child process
        // is reaped by chromiumoxide's own Drop.
        if !self.closed {
            tracing::debug!("Browser session dropped without explicit close");
        }
        self.handler_task.abort();
    }
}
