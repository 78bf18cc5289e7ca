//! Per-site request throttling
//!
//! The limiter governs how many requests are in flight, independent of
//! retry logic: a per-site concurrency cap, a per-site minimum spacing
//! between permit grants, and a global ceiling across all sites. Workers
//! suspend in `acquire` until all three allow a new request.

use crate::config::RateLimitSpec;
use crate::RakeError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Permission for one fetch attempt.
///
/// Holds one per-site slot and one global slot; both free when the permit
/// is dropped, whether the fetch succeeded or failed.
pub struct Permit {
    _site: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

struct SiteLimiter {
    semaphore: Arc<Semaphore>,
    min_delay: Duration,

    /// Earliest instant the next permit may be granted. The tokio mutex
    /// queues waiters fairly, which gives FIFO ordering per site.
    next_grant: tokio::sync::Mutex<Instant>,
}

/// Issues fetch permits across all sites in a run
pub struct RateLimiter {
    global: Arc<Semaphore>,
    sites: Mutex<HashMap<String, Arc<SiteLimiter>>>,
}

impl RateLimiter {
    pub fn new(global_concurrency: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_concurrency)),
            sites: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a site's limits before its first job is scheduled.
    ///
    /// Registering the same site twice keeps the first registration; specs
    /// are immutable for the duration of a run.
    pub fn register(&self, site: &str, spec: &RateLimitSpec) {
        let mut sites = self.sites.lock().expect("rate limiter lock poisoned");
        sites.entry(site.to_string()).or_insert_with(|| {
            Arc::new(SiteLimiter {
                semaphore: Arc::new(Semaphore::new(spec.max_concurrent as usize)),
                min_delay: Duration::from_millis(spec.delay_ms),
                next_grant: tokio::sync::Mutex::new(Instant::now()),
            })
        });
    }

    /// Suspends until a request to `site` may be issued.
    ///
    /// Acquisition order is site slot, then request spacing, then global
    /// slot, so a site waiting out its delay never holds global capacity
    /// idle. Always completes once outstanding permits are released.
    pub async fn acquire(&self, site: &str) -> Result<Permit, RakeError> {
        let limiter = {
            let sites = self.sites.lock().expect("rate limiter lock poisoned");
            sites
                .get(site)
                .cloned()
                .ok_or_else(|| RakeError::Internal(format!("site '{}' not registered", site)))?
        };

        let site_permit = limiter
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RakeError::Internal("site semaphore closed".to_string()))?;

        {
            let mut next_grant = limiter.next_grant.lock().await;
            let now = Instant::now();
            if *next_grant > now {
                let wait = *next_grant - now;
                tracing::trace!("Rate limiting {}: waiting {:?}", site, wait);
                tokio::time::sleep_until(*next_grant).await;
            }
            *next_grant = Instant::now() + limiter.min_delay;
        }

        let global_permit = self
            .global
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RakeError::Internal("global semaphore closed".to_string()))?;

        Ok(Permit {
            _site: site_permit,
            _global: global_permit,
        })
    }

    /// Permits currently available under the global ceiling
    pub fn global_available(&self) -> usize {
        self.global.available_permits()
    }
}
