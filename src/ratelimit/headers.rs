//! Rate limit response headers.

use crate::http::Response;

pub const RETRY_AFTER: &str = "Retry-After";
pub const X_RATELIMIT_LIMIT: &str = "X-RateLimit-Limit";
pub const X_RATELIMIT_REMAINING: &str = "X-RateLimit-Remaining";
pub const X_RATELIMIT_RESET: &str = "X-RateLimit-Reset";

/// Body of the built-in rejection response.
pub const DEFAULT_REJECTION_BODY: &str = "Too many requests, please try again later.";
/// Status of the built-in rejection response.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Stamp the rate limit headers onto `response`.
///
/// `Retry-After` and `X-RateLimit-Reset` both carry `retry_after_or_reset_secs`.
/// A missing `remaining` is reported as `0`. Existing headers with the same
/// names are overridden; status and body are kept.
pub fn craft_rate_limit_headers(
    response: Response,
    max_requests: u32,
    retry_after_or_reset_secs: u64,
    remaining: Option<u32>,
) -> Response {
    let secs = retry_after_or_reset_secs.to_string();
    response.with_headers([
        (RETRY_AFTER, secs.clone()),
        (X_RATELIMIT_LIMIT, max_requests.to_string()),
        (X_RATELIMIT_REMAINING, remaining.unwrap_or(0).to_string()),
        (X_RATELIMIT_RESET, secs),
    ])
}

/// The response sent when a request is rejected and no custom callback is
/// configured.
pub fn default_rejection() -> Response {
    Response::new(TOO_MANY_REQUESTS, DEFAULT_REJECTION_BODY)
}
