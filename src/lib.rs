//! Admission control service library.

pub mod auth;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod notify;
pub mod observability;
pub mod security;
pub mod store;

pub use config::GateConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
