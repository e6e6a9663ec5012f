//! Limiter trait for abstracting global and per-endpoint implementations.

use async_trait::async_trait;

use crate::error::Result;
use crate::http::{Handler, Request, Response};

/// Trait for limiter implementations.
///
/// This trait abstracts over both the [`GlobalRateLimiter`] and the
/// [`EndpointRateLimiter`] so an embedding server can hold either behind
/// `Arc<dyn RateLimiterBackend>`.
///
/// [`GlobalRateLimiter`]: super::GlobalRateLimiter
/// [`EndpointRateLimiter`]: super::EndpointRateLimiter
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Admit or reject `request`, forwarding admitted requests to `handler`.
    async fn handle(&self, request: Request, handler: &dyn Handler) -> Result<Response>;

    /// Drop idle client keys from every tracker. Returns how many were
    /// removed.
    fn purge_idle(&self) -> usize;
}
