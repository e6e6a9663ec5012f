//! Per-endpoint rate limits.
//!
//! Each rule pairs a path pattern with its own options and its own tracker.
//! Rules are tried in the order they were registered and the first pattern
//! that matches governs the request; there is no "most specific wins"
//! ordering. Paths no rule matches fall back to the default rule, or pass
//! through unlimited when there is none.
//!
//! Matching is by exact segment count, so a trailing slash is significant:
//! `/auth/` has one more (empty) segment than `/auth` and is not governed
//! by an `/auth` rule, nor by `/auth/*` since `*` never matches an empty
//! segment. It falls to the default rule, or passes through unlimited. Give
//! such paths their own rule, or canonicalize paths upstream, when that
//! matters.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, trace};

use super::backend::RateLimiterBackend;
use super::dispatch;
use super::options::RateLimiterOptions;
use super::pattern;
use super::window::WindowTracker;
use crate::error::Result;
use crate::http::{Handler, Request, Response};

/// Pattern reported for the default rule; it is never matched against.
const DEFAULT_PATTERN: &str = "*";

/// A route pattern bound to its options and tracker.
#[derive(Debug)]
pub struct RouteRule {
    pattern: String,
    options: RateLimiterOptions,
    tracker: Arc<WindowTracker>,
}

impl RouteRule {
    fn new(pattern: String, options: RateLimiterOptions) -> Self {
        Self {
            pattern,
            tracker: Arc::new(options.tracker()),
            options,
        }
    }

    /// Normalized pattern, or `*` for the default rule.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Options applied to requests this rule governs.
    pub fn options(&self) -> &RateLimiterOptions {
        &self.options
    }

    /// Tracker shared by every path this rule governs.
    pub fn tracker(&self) -> &Arc<WindowTracker> {
        &self.tracker
    }
}

/// Routes each request to the limiter of the first matching rule.
#[derive(Debug)]
pub struct EndpointRateLimiter {
    rules: Vec<RouteRule>,
    default: Option<RouteRule>,
}

impl EndpointRateLimiter {
    /// Create a limiter from rules in registration order and optional
    /// default options for unmatched paths.
    pub fn new<I, P>(endpoint_limits: I, default_options: Option<RateLimiterOptions>) -> Self
    where
        I: IntoIterator<Item = (P, RateLimiterOptions)>,
        P: AsRef<str>,
    {
        let rules: Vec<RouteRule> = endpoint_limits
            .into_iter()
            .map(|(p, options)| RouteRule::new(pattern::normalize(p.as_ref()).into_owned(), options))
            .collect();
        let default = default_options.map(|options| RouteRule::new(DEFAULT_PATTERN.to_string(), options));

        for rule in &rules {
            debug!(
                pattern = %rule.pattern,
                limit = rule.options.max_requests(),
                window = ?rule.options.window(),
                "Registered endpoint rule"
            );
        }
        info!(
            rules = rules.len(),
            has_default = default.is_some(),
            "Endpoint rate limiter initialized"
        );

        Self { rules, default }
    }

    /// Find the rule governing `path`.
    ///
    /// Returns `None` when no pattern matches and there is no default, in
    /// which case the request is not rate limited.
    pub fn route(&self, path: &str) -> Option<(&WindowTracker, &RateLimiterOptions)> {
        self.rule_for(path)
            .map(|rule| (rule.tracker.as_ref(), &rule.options))
    }

    /// Like [`route`](Self::route) but returns the whole rule.
    pub fn rule_for(&self, path: &str) -> Option<&RouteRule> {
        let path = pattern::normalize(path);
        self.rules
            .iter()
            .find(|rule| pattern::matches(&path, &rule.pattern))
            .or(self.default.as_ref())
    }

    /// Admit or reject `request` under the rule for its path.
    pub async fn handle(&self, request: Request, handler: &dyn Handler) -> Result<Response> {
        match self.rule_for(request.path()) {
            Some(rule) => {
                trace!(path = %request.path(), pattern = %rule.pattern, "Matched endpoint rule");
                dispatch::handle(&rule.tracker, &rule.options, request, handler).await
            }
            None => {
                trace!(path = %request.path(), "No endpoint rule, passing through");
                Ok(handler.call(request).await)
            }
        }
    }

    /// Registered rules in registration order.
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Rule for paths no pattern matches, if configured.
    pub fn default_rule(&self) -> Option<&RouteRule> {
        self.default.as_ref()
    }

    /// Every tracker this limiter owns, default last.
    pub fn trackers(&self) -> impl Iterator<Item = &Arc<WindowTracker>> {
        self.rules
            .iter()
            .chain(self.default.iter())
            .map(|rule| &rule.tracker)
    }
}

#[async_trait]
impl RateLimiterBackend for EndpointRateLimiter {
    async fn handle(&self, request: Request, handler: &dyn Handler) -> Result<Response> {
        EndpointRateLimiter::handle(self, request, handler).await
    }

    fn purge_idle(&self) -> usize {
        self.trackers().map(|tracker| tracker.purge_idle()).sum()
    }
}
