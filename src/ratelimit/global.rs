//! A single limiter applied to all traffic.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::backend::RateLimiterBackend;
use super::dispatch;
use super::options::RateLimiterOptions;
use super::window::WindowTracker;
use crate::error::Result;
use crate::http::{Handler, Request, Response};

/// Applies one window to every request, bucketed only by client key.
///
/// This struct is thread-safe and can be shared across multiple tasks.
#[derive(Debug)]
pub struct GlobalRateLimiter {
    tracker: Arc<WindowTracker>,
    options: RateLimiterOptions,
}

impl GlobalRateLimiter {
    /// Create a limiter with a fresh tracker built from `options`.
    pub fn new(options: RateLimiterOptions) -> Self {
        info!(
            limit = options.max_requests(),
            window = ?options.window(),
            "Global rate limiter initialized"
        );
        Self {
            tracker: Arc::new(options.tracker()),
            options,
        }
    }

    /// Admit or reject `request`, forwarding it to `handler` if admitted.
    pub async fn handle(&self, request: Request, handler: &dyn Handler) -> Result<Response> {
        dispatch::handle(&self.tracker, &self.options, request, handler).await
    }

    /// Options applied to every request.
    pub fn options(&self) -> &RateLimiterOptions {
        &self.options
    }

    /// The shared tracker, e.g. for [`spawn_idle_sweeper`](super::spawn_idle_sweeper).
    pub fn tracker(&self) -> &Arc<WindowTracker> {
        &self.tracker
    }
}

#[async_trait]
impl RateLimiterBackend for GlobalRateLimiter {
    async fn handle(&self, request: Request, handler: &dyn Handler) -> Result<Response> {
        GlobalRateLimiter::handle(self, request, handler).await
    }

    fn purge_idle(&self) -> usize {
        self.tracker.purge_idle()
    }
}
