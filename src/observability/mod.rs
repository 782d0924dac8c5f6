//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, request spans)
//!     → metrics.rs (admission counters, limiter gauge)
//!
//! Consumers:
//!     → stdout (pretty for development, JSON for production)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every span
//! - Metric updates are plain atomic increments on the request path
//! - Secrets (token plaintext, passwords, signing key) never reach either sink

pub mod logging;
pub mod metrics;
