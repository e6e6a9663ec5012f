//! Ratewarden - Sliding-Window Rate Limiting Engine
//!
//! This crate implements a request rate limiter meant to sit in front of an
//! HTTP handler. It counts, per client key, the requests admitted within a
//! trailing time window, rejects requests over the limit with a 429, and
//! stamps `Retry-After` / `X-RateLimit-*` headers on every response it
//! touches. Limits apply either to all traffic ([`GlobalRateLimiter`]) or per
//! route pattern ([`EndpointRateLimiter`]).
//!
//! [`GlobalRateLimiter`]: ratelimit::GlobalRateLimiter
//! [`EndpointRateLimiter`]: ratelimit::EndpointRateLimiter

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
