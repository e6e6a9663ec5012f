//! Per-rule limiter options.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::window::WindowTracker;
use crate::clock::{Clock, SystemClock};
use crate::error::{BoxError, RateWardenError, Result};
use crate::http::{HeaderMap, Request, Response};

/// Derives the client key a request is counted under.
pub type ClientKeyExtractor = Arc<dyn Fn(&Request) -> Result<String> + Send + Sync>;

/// Produces the response for a rejected request.
///
/// Implemented for any async closure `Fn(Request) -> Future<Output =
/// Result<Response, BoxError>>`. Errors are handed back to the embedding
/// application untouched.
#[async_trait]
pub trait RejectionHandler: Send + Sync {
    /// Build the response for `request`, which was over its limit.
    async fn on_rate_limit_exceeded(
        &self,
        request: Request,
    ) -> std::result::Result<Response, BoxError>;
}

#[async_trait]
impl<F, Fut> RejectionHandler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Response, BoxError>> + Send + 'static,
{
    async fn on_rate_limit_exceeded(
        &self,
        request: Request,
    ) -> std::result::Result<Response, BoxError> {
        (self)(request).await
    }
}

/// Key requests by the value of a request header.
///
/// Requests without the header fail with [`RateWardenError::KeyExtraction`].
pub fn by_header(name: impl Into<String>) -> ClientKeyExtractor {
    let name = name.into();
    Arc::new(move |request: &Request| {
        request
            .header(&name)
            .map(str::to_owned)
            .ok_or_else(|| RateWardenError::KeyExtraction(format!("missing header {}", name)))
    })
}

/// Key requests by a value the embedding application attached to the
/// request's extensions.
pub fn by_extension(key: impl Into<String>) -> ClientKeyExtractor {
    let key = key.into();
    Arc::new(move |request: &Request| {
        request
            .extension(&key)
            .map(str::to_owned)
            .ok_or_else(|| RateWardenError::KeyExtraction(format!("missing extension {}", key)))
    })
}

/// Configuration for one rate limit rule.
///
/// Immutable once built. Cloning is cheap; callbacks are shared.
#[derive(Clone)]
pub struct RateLimiterOptions {
    max_requests: u32,
    window: Duration,
    client_key_extractor: Option<ClientKeyExtractor>,
    on_rate_limit_exceeded: Option<Arc<dyn RejectionHandler>>,
    headers: HeaderMap,
    clock: Arc<dyn Clock>,
}

impl RateLimiterOptions {
    /// Options with only the limit and window set.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        Self::builder(max_requests, window).build()
    }

    /// Start building options with the given limit and window.
    pub fn builder(max_requests: u32, window: Duration) -> RateLimiterOptionsBuilder {
        RateLimiterOptionsBuilder {
            max_requests,
            window,
            client_key_extractor: None,
            on_rate_limit_exceeded: None,
            headers: HeaderMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Maximum requests admitted per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Length of the trailing window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Extra headers applied to every response this rule touches.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Custom rejection callback, if one was configured.
    pub fn rejection_handler(&self) -> Option<&Arc<dyn RejectionHandler>> {
        self.on_rate_limit_exceeded.as_ref()
    }

    /// Resolve the client key for `request`.
    ///
    /// Without a custom extractor the remote address is used; a request
    /// with neither is a configuration error.
    pub fn client_key(&self, request: &Request) -> Result<String> {
        match &self.client_key_extractor {
            Some(extract) => extract(request),
            None => request
                .remote_addr()
                .map(str::to_owned)
                .ok_or(RateWardenError::MissingClientIdentity),
        }
    }

    /// A fresh tracker sized for these options.
    pub fn tracker(&self) -> WindowTracker {
        WindowTracker::with_clock(self.max_requests, self.window, Arc::clone(&self.clock))
    }
}

impl fmt::Debug for RateLimiterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterOptions")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("custom_key", &self.client_key_extractor.is_some())
            .field("custom_rejection", &self.on_rate_limit_exceeded.is_some())
            .field("headers", &self.headers)
            .finish()
    }
}

/// Builder for [`RateLimiterOptions`].
pub struct RateLimiterOptionsBuilder {
    max_requests: u32,
    window: Duration,
    client_key_extractor: Option<ClientKeyExtractor>,
    on_rate_limit_exceeded: Option<Arc<dyn RejectionHandler>>,
    headers: HeaderMap,
    clock: Arc<dyn Clock>,
}

impl RateLimiterOptionsBuilder {
    /// Derive client keys with `extractor` instead of the remote address.
    pub fn client_key_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&Request) -> Result<String> + Send + Sync + 'static,
    {
        self.client_key_extractor = Some(Arc::new(extractor));
        self
    }

    /// Use an already shared extractor such as [`by_header`].
    pub fn client_key(mut self, extractor: ClientKeyExtractor) -> Self {
        self.client_key_extractor = Some(extractor);
        self
    }

    /// Build rejection responses with `handler` instead of the default 429.
    pub fn on_rate_limit_exceeded<H>(mut self, handler: H) -> Self
    where
        H: RejectionHandler + 'static,
    {
        self.on_rate_limit_exceeded = Some(Arc::new(handler));
        self
    }

    /// Add a header to every response under these options.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add several headers at once; later names replace earlier ones.
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.merge(headers);
        self
    }

    /// Drive trackers built from these options with `clock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate and finish the options.
    pub fn build(self) -> Result<RateLimiterOptions> {
        if self.max_requests == 0 {
            return Err(RateWardenError::Config(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(RateWardenError::Config(
                "window must be greater than zero".to_string(),
            ));
        }

        Ok(RateLimiterOptions {
            max_requests: self.max_requests,
            window: self.window,
            client_key_extractor: self.client_key_extractor,
            on_rate_limit_exceeded: self.on_rate_limit_exceeded,
            headers: self.headers,
            clock: self.clock,
        })
    }
}
