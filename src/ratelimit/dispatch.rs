//! The admit/reject pipeline shared by both limiters.

use tracing::{debug, trace, warn};

use super::headers::{craft_rate_limit_headers, default_rejection};
use super::options::RateLimiterOptions;
use super::window::WindowTracker;
use crate::error::{RateWardenError, Result};
use crate::http::{Handler, Request, Response};

/// Run `request` through `tracker` under `options`.
///
/// Rejected requests never reach `handler`. Their response comes from the
/// configured rejection callback or the default 429, and `Retry-After`
/// carries the full window. Admitted requests are forwarded, and the
/// handler's response reports the remaining quota and the seconds until the
/// oldest counted request expires.
pub async fn handle(
    tracker: &WindowTracker,
    options: &RateLimiterOptions,
    request: Request,
    handler: &dyn Handler,
) -> Result<Response> {
    let key = match options.client_key(&request) {
        Ok(key) => key,
        Err(e) => {
            warn!(path = %request.path(), error = %e, "Unable to identify client");
            return Err(e);
        }
    };

    trace!(key = %key, path = %request.path(), "Checking rate limit");

    // The tracker lock is released before any await below.
    let decision = tracker.is_allowed(&key);

    if !decision.allowed {
        debug!(
            key = %key,
            path = %request.path(),
            limit = options.max_requests(),
            "Rate limit exceeded"
        );

        let response = match options.rejection_handler() {
            Some(callback) => callback
                .on_rate_limit_exceeded(request)
                .await
                .map_err(RateWardenError::Callback)?,
            None => default_rejection(),
        };
        let response = response.with_headers(options.headers().iter());

        return Ok(craft_rate_limit_headers(
            response,
            options.max_requests(),
            options.window().as_secs(),
            None,
        ));
    }

    let response = handler.call(request).await;
    let response = response.with_headers(options.headers().iter());

    Ok(craft_rate_limit_headers(
        response,
        options.max_requests(),
        decision.reset_secs,
        Some(decision.remaining),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::BoxError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ok_handler() -> impl Handler {
        |_req: Request| async { Response::ok("ok") }
    }

    #[tokio::test]
    async fn test_admit_then_reject() {
        let options = RateLimiterOptions::new(2, Duration::from_secs(10)).unwrap();
        let tracker = options.tracker();
        let handler = ok_handler();
        let request = || Request::new("/").with_remote_addr("X");

        for remaining in ["1", "0"] {
            let response = handle(&tracker, &options, request(), &handler).await.unwrap();
            assert_eq!(response.status(), 200);
            assert_eq!(response.header("X-RateLimit-Limit"), Some("2"));
            assert_eq!(response.header("X-RateLimit-Remaining"), Some(remaining));
        }

        let response = handle(&tracker, &options, request(), &handler).await.unwrap();
        assert_eq!(response.status(), 429);
        assert_eq!(response.body_text(), "Too many requests, please try again later.");
        assert_eq!(response.header("X-RateLimit-Limit"), Some("2"));
        assert_eq!(response.header("X-RateLimit-Remaining"), Some("0"));
        assert_eq!(response.header("Retry-After"), Some("10"));
        assert_eq!(response.header("X-RateLimit-Reset"), Some("10"));
    }

    #[tokio::test]
    async fn test_retry_after_asymmetry() {
        let clock = ManualClock::new();
        let options = RateLimiterOptions::builder(1, Duration::from_secs(10))
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        let tracker = options.tracker();
        let handler = ok_handler();

        let admitted = handle(&tracker, &options, Request::new("/").with_remote_addr("X"), &handler)
            .await
            .unwrap();
        assert_eq!(admitted.header("Retry-After"), Some("10"));

        clock.advance(Duration::from_secs(7));
        let rejected = handle(&tracker, &options, Request::new("/").with_remote_addr("X"), &handler)
            .await
            .unwrap();
        // The rejection always reports the whole window, not the 3s left.
        assert_eq!(rejected.status(), 429);
        assert_eq!(rejected.header("Retry-After"), Some("10"));
    }

    #[tokio::test]
    async fn test_admitted_reset_counts_down_from_oldest() {
        let clock = ManualClock::new();
        let options = RateLimiterOptions::builder(2, Duration::from_secs(10))
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        let tracker = options.tracker();
        let handler = ok_handler();

        handle(&tracker, &options, Request::new("/").with_remote_addr("X"), &handler)
            .await
            .unwrap();

        clock.advance(Duration::from_secs(4));
        let second = handle(&tracker, &options, Request::new("/").with_remote_addr("X"), &handler)
            .await
            .unwrap();

        assert_eq!(second.status(), 200);
        assert_eq!(second.header("X-RateLimit-Remaining"), Some("0"));
        assert_eq!(second.header("Retry-After"), Some("6"));
        assert_eq!(second.header("X-RateLimit-Reset"), Some("6"));
    }

    #[tokio::test]
    async fn test_rejected_request_skips_handler() {
        let options = RateLimiterOptions::new(1, Duration::from_secs(10)).unwrap();
        let tracker = options.tracker();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = {
            let calls = Arc::clone(&calls);
            move |_req: Request| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Response::ok("")
                }
            }
        };

        for _ in 0..3 {
            handle(&tracker, &options, Request::new("/").with_remote_addr("X"), &counted)
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_rejection_keeps_its_headers() {
        let options = RateLimiterOptions::builder(1, Duration::from_secs(5))
            .on_rate_limit_exceeded(|_req: Request| async {
                Ok::<_, BoxError>(
                    Response::new(503, "slow down")
                        .with_header("X-Custom", "from-callback")
                        .with_header("X-Service", "callback"),
                )
            })
            .header("X-Service", "options")
            .header("X-Extra", "yes")
            .build()
            .unwrap();
        let tracker = options.tracker();
        let handler = ok_handler();
        let request = || Request::new("/").with_remote_addr("X");

        handle(&tracker, &options, request(), &handler).await.unwrap();
        let response = handle(&tracker, &options, request(), &handler).await.unwrap();

        assert_eq!(response.status(), 503);
        assert_eq!(response.body_text(), "slow down");
        assert_eq!(response.header("X-Custom"), Some("from-callback"));
        assert_eq!(response.header("X-Service"), Some("options"));
        assert_eq!(response.header("X-Extra"), Some("yes"));
        assert_eq!(response.header("X-RateLimit-Limit"), Some("1"));
        assert_eq!(response.header("Retry-After"), Some("5"));
    }

    #[tokio::test]
    async fn test_callback_error_propagates() {
        let options = RateLimiterOptions::builder(1, Duration::from_secs(5))
            .on_rate_limit_exceeded(|_req: Request| async {
                Err::<Response, BoxError>("callback broke".into())
            })
            .build()
            .unwrap();
        let tracker = options.tracker();
        let handler = ok_handler();

        handle(&tracker, &options, Request::new("/").with_remote_addr("X"), &handler)
            .await
            .unwrap();
        let err = handle(&tracker, &options, Request::new("/").with_remote_addr("X"), &handler)
            .await
            .unwrap_err();

        assert!(matches!(err, RateWardenError::Callback(_)));
    }

    #[tokio::test]
    async fn test_missing_identity_fails_loudly() {
        let options = RateLimiterOptions::new(1, Duration::from_secs(5)).unwrap();
        let tracker = options.tracker();
        let handler = ok_handler();

        let err = handle(&tracker, &options, Request::new("/"), &handler)
            .await
            .unwrap_err();

        assert!(matches!(err, RateWardenError::MissingClientIdentity));
        assert_eq!(tracker.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_option_headers_lose_to_rate_limit_headers() {
        let options = RateLimiterOptions::builder(4, Duration::from_secs(5))
            .header("X-RateLimit-Limit", "1000")
            .header("X-Service", "api")
            .build()
            .unwrap();
        let tracker = options.tracker();
        let handler = ok_handler();

        let response = handle(&tracker, &options, Request::new("/").with_remote_addr("X"), &handler)
            .await
            .unwrap();

        assert_eq!(response.header("X-RateLimit-Limit"), Some("4"));
        assert_eq!(response.header("X-Service"), Some("api"));
    }
}
