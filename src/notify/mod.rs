//! Webhook notifications
//!
//! Optional per-site webhooks receive a JSON payload when a site-run
//! fails and a summary when a run finishes with failures. Notifications
//! are advisory: delivery failures are logged and swallowed.

use crate::config::WebhookSpec;
use crate::state::{RunSummary, SiteOutcome};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

/// Posts run notifications to configured webhooks
pub struct Notifier {
    client: Client,
}

impl Notifier {
    pub fn new() -> Self {
        // A notifier that cannot build its client still must not fail the
        // run; fall back to a default client.
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Reports one failed site-run
    pub async fn send_failure(&self, webhook: &WebhookSpec, outcome: &SiteOutcome) {
        let payload = json!({
            "event": "site_failed",
            "site": outcome.site_name,
            "terminal": outcome.terminal.as_str(),
            "pages_fetched": outcome.pages_fetched,
            "items_extracted": outcome.items_extracted,
            "errors": outcome.errors,
        });
        self.post(&webhook.url, payload).await;
    }

    /// Reports a finished run; only sent when at least one site failed
    pub async fn send_summary(&self, webhook: &WebhookSpec, summary: &RunSummary) {
        if summary.sites_failed == 0 {
            return;
        }

        let failed: Vec<_> = summary
            .outcomes
            .iter()
            .filter(|o| !o.succeeded())
            .map(|o| {
                json!({
                    "site": o.site_name,
                    "terminal": o.terminal.as_str(),
                    "first_error": o.errors.first(),
                })
            })
            .collect();

        let payload = json!({
            "event": "run_summary",
            "total_sites": summary.total_sites,
            "sites_succeeded": summary.sites_succeeded,
            "sites_failed": summary.sites_failed,
            "total_items": summary.total_items,
            "duration_secs": summary.duration_secs,
            "failed_sites": failed,
        });
        self.post(&webhook.url, payload).await;
    }

    async fn post(&self, url: &str, payload: serde_json::Value) {
        match self.client.post(url).json(&payload).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(
                    "Webhook {} returned status {}",
                    url,
                    response.status().as_u16()
                );
            }
            Ok(_) => {
                tracing::debug!("Webhook delivered to {}", url);
            }
            Err(e) => {
                tracing::warn!("Could not reach webhook {}: {}", url, e);
            }
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
