//! # Actix Middleware Library
//!
//! Shared middleware for the messaging HTTP surface
//!
//! ## Modules
//! - `identity`: trusts the gateway-authenticated `x-user-id` header
//! - `correlation_id`: request correlation ids
//! - `logging`: request/response tracing
//! - `metrics`: Prometheus HTTP metrics

pub mod correlation_id;
pub mod identity;
pub mod logging;
pub mod metrics;

pub use correlation_id::{get_correlation_id, CorrelationId, CorrelationIdMiddleware};
pub use identity::{GatewayIdentity, UserId, USER_ID_HEADER};
pub use logging::Logging;
pub use metrics::MetricsMiddleware;
