//! Middleware for request logging and admission control.
//!
//! This module provides:
//! - Request logging with latency tracking
//! - Fixed-window rate limiting per client identity

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{rate_limit_middleware, Admission, RateLimitConfig, RateLimiter};
