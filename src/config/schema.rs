//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every section has defaults, so an empty file is a valid development config
//! once a signing secret is supplied.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Service identifier used as token issuer and audience by default.
pub const DEFAULT_SERVICE_ID: &str = "gatekeeper";

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Per-client admission throttling.
    pub rate_limit: RateLimitConfig,

    /// Bearer-token signing and validation.
    pub auth: AuthConfig,

    /// Single-use activation tokens.
    pub activation: ActivationConfig,

    /// Password hashing.
    pub password: PasswordConfig,

    /// Backing store. In-memory when no DSN is set.
    pub database: DatabaseConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Graceful shutdown.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:4000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4000".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total request timeout in seconds.
    pub request_secs: u64,

    /// Deadline for a single backing-store call in seconds.
    pub store_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn store(&self) -> Duration {
        Duration::from_secs(self.store_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            store_secs: 3,
        }
    }
}

/// Token-bucket rate limiting, keyed by client IP.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    /// Sustained refill rate.
    pub requests_per_second: f64,

    /// Bucket capacity; a fresh client may send this many requests at once.
    pub burst_size: u32,

    /// Client entries unseen for this long are evicted.
    pub idle_secs: u64,

    /// How often the eviction sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 2.0,
            burst_size: 4,
            idle_secs: 180,
            sweep_interval_secs: 60,
        }
    }
}

/// Bearer-token settings.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC signing secret. Usually supplied via `GATEKEEPER_JWT_SECRET`.
    pub jwt_secret: String,

    pub issuer: String,

    pub audience: String,

    /// Token lifetime in seconds.
    pub token_lifetime_secs: u64,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("token_lifetime_secs", &self.token_lifetime_secs)
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            issuer: DEFAULT_SERVICE_ID.to_string(),
            audience: DEFAULT_SERVICE_ID.to_string(),
            token_lifetime_secs: 3600,
        }
    }
}

/// Activation token settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Token time-to-live in seconds (default three days).
    pub ttl_secs: u64,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self { ttl_secs: 3 * 24 * 60 * 60 }
    }
}

/// Password hashing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// bcrypt work factor.
    pub bcrypt_cost: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: crate::auth::password::DEFAULT_COST,
        }
    }
}

/// Backing store settings.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL DSN. Usually supplied via `GATEKEEPER_DB_DSN`.
    pub dsn: Option<String>,

    pub max_connections: u32,

    /// Create tables on startup.
    pub migrate: bool,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("dsn", &self.dsn.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .field("migrate", &self.migrate)
            .finish()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            max_connections: 25,
            migrate: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directive (e.g., "gatekeeper=debug"). `RUST_LOG` takes precedence.
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Graceful shutdown settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for in-flight background tasks after the listener stops.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { drain_timeout_secs: 10 }
    }
}
