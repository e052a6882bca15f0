//! Resilience layer for outbound calls to a rate-limited, occasionally failing API.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller
//!       │
//!       ▼
//!  ┌──────────────────────────── ResilienceCore ────────────────────────────┐
//!  │  RetryOrchestrator ──▶ RateLimiter ──▶ CircuitBreaker ──▶ operation ───┼──▶ dependency
//!  │  (classify, refresh,   (window, global  (closed / open /               │
//!  │   back off)             quota, queue)    half-open)                    │
//!  └────────────────────────────────────────────────────────────────────────┘
//!       ▲                         ▲
//!       │ ClassifiedError         │ response headers
//! ```

// Core subsystems
pub mod errors;
pub mod rate_limit;
pub mod resilience;

// Outbound HTTP
pub mod client;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use client::{GuardedClient, GuardedResponse};
pub use config::ResilienceConfig;
pub use errors::{ApiError, ClassifiedError, ErrorCode, ErrorKind, ErrorPayload};
pub use lifecycle::Shutdown;
pub use rate_limit::RateLimiter;
pub use resilience::{
    CircuitBreaker, CircuitState, ResilienceCore, ResilienceStats, RetryOrchestrator,
};
