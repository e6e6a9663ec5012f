//! Configuration management for Ratewarden.
//!
//! Limits are described in YAML. A configuration either sets a single
//! `global` limit or a list of `endpoints` (tried in order) with an optional
//! `default`:
//!
//! ```yaml
//! endpoints:
//!   - pattern: /auth
//!     max_requests: 5
//!     window_secs: 60
//!   - pattern: /api/v1/*
//!     max_requests: 100
//!     window_secs: 60
//!     client_key:
//!       header: x-api-key
//! default:
//!   max_requests: 1000
//!   window_secs: 60
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::{RateWardenError, Result};
use crate::http::{Handler, Request, Response};
use crate::ratelimit::{
    by_extension, by_header, spawn_idle_sweeper, EndpointRateLimiter, GlobalRateLimiter,
    RateLimiterBackend, RateLimiterOptions, WindowTracker,
};

/// Prefix for environment variable overrides, e.g.
/// `RATEWARDEN__LOGGING__LEVEL=debug`.
pub const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for the Ratewarden engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateWardenConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// A single limit applied to all traffic
    #[serde(default)]
    pub global: Option<LimitConfig>,

    /// Per-endpoint limits, first match wins
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Limit for paths no endpoint matches
    #[serde(default)]
    pub default: Option<LimitConfig>,

    /// How often to purge idle client keys; disabled when unset
    #[serde(default)]
    pub idle_sweep_secs: Option<u64>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Maximum requests per window
    pub max_requests: u32,

    /// Window length in seconds
    pub window_secs: u64,

    /// Extra headers added to every response under this limit
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Where the client key comes from; the remote address when unset
    #[serde(default)]
    pub client_key: ClientKeyConfig,
}

/// Source of the client key. At most one field may be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientKeyConfig {
    /// Key by this request header
    #[serde(default)]
    pub header: Option<String>,

    /// Key by this request extension
    #[serde(default)]
    pub extension: Option<String>,
}

/// A limit bound to a route pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Literal path or pattern with `*` segments
    pub pattern: String,

    #[serde(flatten)]
    pub limit: LimitConfig,
}

impl LimitConfig {
    /// Convert into validated limiter options.
    pub fn to_options(&self) -> Result<RateLimiterOptions> {
        let mut builder =
            RateLimiterOptions::builder(self.max_requests, Duration::from_secs(self.window_secs))
                .headers(self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        builder = match (&self.client_key.header, &self.client_key.extension) {
            (Some(_), Some(_)) => {
                return Err(RateWardenError::Config(
                    "client_key may set either header or extension, not both".to_string(),
                ))
            }
            (Some(header), None) => builder.client_key(by_header(header.clone())),
            (None, Some(extension)) => builder.client_key(by_extension(extension.clone())),
            (None, None) => builder,
        };

        builder.build()
    }
}

impl RateWardenConfig {
    /// Load configuration from a YAML file, layered with `RATEWARDEN__*`
    /// environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit configuration");

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Yaml))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RateWardenError::Config(format!("Failed to parse rate limit config: {}", e)))
    }

    /// Validate and build the limiter this configuration describes.
    pub fn build(&self) -> Result<Limiter> {
        let has_endpoints = !self.endpoints.is_empty() || self.default.is_some();

        match &self.global {
            Some(_) if has_endpoints => Err(RateWardenError::Config(
                "global cannot be combined with endpoints or default".to_string(),
            )),
            Some(global) => Ok(Limiter::Global(GlobalRateLimiter::new(global.to_options()?))),
            None if has_endpoints => {
                let rules = self
                    .endpoints
                    .iter()
                    .map(|endpoint| -> Result<(String, RateLimiterOptions)> {
                        Ok((endpoint.pattern.clone(), endpoint.limit.to_options()?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let default = self.default.as_ref().map(LimitConfig::to_options).transpose()?;
                Ok(Limiter::Endpoint(EndpointRateLimiter::new(rules, default)))
            }
            None => Err(RateWardenError::Config(
                "no limits configured: set global, endpoints or default".to_string(),
            )),
        }
    }

    /// Idle sweep interval, if enabled.
    pub fn idle_sweep_interval(&self) -> Option<Duration> {
        self.idle_sweep_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// A limiter built from configuration.
#[derive(Debug)]
pub enum Limiter {
    Global(GlobalRateLimiter),
    Endpoint(EndpointRateLimiter),
}

impl Limiter {
    /// The pattern and options that govern `path`, if any. The global
    /// limiter reports `*`.
    pub fn rule_for(&self, path: &str) -> Option<(&str, &RateLimiterOptions)> {
        match self {
            Limiter::Global(limiter) => Some(("*", limiter.options())),
            Limiter::Endpoint(limiter) => limiter
                .rule_for(path)
                .map(|rule| (rule.pattern(), rule.options())),
        }
    }

    /// Every tracker owned by this limiter.
    pub fn trackers(&self) -> Vec<Arc<WindowTracker>> {
        match self {
            Limiter::Global(limiter) => vec![Arc::clone(limiter.tracker())],
            Limiter::Endpoint(limiter) => limiter.trackers().cloned().collect(),
        }
    }

    /// Start one idle sweeper per tracker.
    pub fn spawn_idle_sweepers(&self, every: Duration) -> Vec<JoinHandle<()>> {
        self.trackers()
            .into_iter()
            .map(|tracker| spawn_idle_sweeper(tracker, every))
            .collect()
    }
}

#[async_trait]
impl RateLimiterBackend for Limiter {
    async fn handle(&self, request: Request, handler: &dyn Handler) -> Result<Response> {
        match self {
            Limiter::Global(limiter) => limiter.handle(request, handler).await,
            Limiter::Endpoint(limiter) => limiter.handle(request, handler).await,
        }
    }

    fn purge_idle(&self) -> usize {
        match self {
            Limiter::Global(limiter) => RateLimiterBackend::purge_idle(limiter),
            Limiter::Endpoint(limiter) => RateLimiterBackend::purge_idle(limiter),
        }
    }
}
