//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack, route guards)
//!     → handlers/ (decode with error.rs::JsonBody, check with validation.rs)
//!     → store / auth subsystems
//!     → error.rs (every failure rendered as a {"error": ...} envelope)
//! ```

pub mod error;
pub mod handlers;
pub mod server;
pub mod validation;

pub use error::ApiError;
pub use server::{AppState, HttpServer};
