//! Rate limiting logic and state management.

mod backend;
mod dispatch;
mod endpoint;
mod global;
pub mod headers;
mod options;
pub mod pattern;
mod window;

pub use backend::RateLimiterBackend;
pub use endpoint::{EndpointRateLimiter, RouteRule};
pub use global::GlobalRateLimiter;
pub use headers::craft_rate_limit_headers;
pub use options::{
    by_extension, by_header, ClientKeyExtractor, RateLimiterOptions, RateLimiterOptionsBuilder,
    RejectionHandler,
};
pub use window::{spawn_idle_sweeper, Decision, WindowTracker};
