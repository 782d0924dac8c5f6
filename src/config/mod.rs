//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → GateConfig (validated, immutable)
//!     → handed to startup, which builds each subsystem from its section
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AuthConfig;
pub use schema::GateConfig;
pub use schema::ObservabilityConfig;
pub use schema::RateLimitConfig;
