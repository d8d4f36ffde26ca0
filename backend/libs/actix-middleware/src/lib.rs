//! # Actix Middleware Library
//!
//! Middleware shared by Nova actix-web services
//!
//! ## Modules
//! - `jwt_auth`: session token authentication, exposes the caller as [`UserId`]
//! - `correlation_id`: `x-correlation-id` propagation and request spans
//! - `metrics`: Prometheus request counters and latency histograms

pub mod correlation_id;
pub mod jwt_auth;
pub mod metrics;

pub use correlation_id::{get_correlation_id, CorrelationId, CorrelationIdMiddleware};
pub use jwt_auth::{AuthError, JwtAuthMiddleware, UserId};
pub use metrics::MetricsMiddleware;
