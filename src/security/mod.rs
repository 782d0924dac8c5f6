//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-IP token bucket, 429 when empty)
//!     → auth pipeline (principal attached)
//!     → access_control.rs (route guard: authenticated, activated, capability)
//!     → handler
//! ```
//!
//! # Design Decisions
//! - Fail closed: a request that cannot be attributed to a client is refused
//! - Guards re-read permissions per request; no cross-request cache
//! - Limiter state is an owned instance handed to the router, never a global

pub mod access_control;
pub mod rate_limit;

pub use access_control::{PermissionGate, RequirePermission};
pub use rate_limit::{Admission, RateLimiter};
