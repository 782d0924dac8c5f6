//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates > 0, lifetimes > 0, bcrypt cost in range)
//! - Reject weak signing secrets
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GateConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GateConfig;

/// Shortest accepted HMAC secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Activation tokens live at most thirty days.
pub const MAX_ACTIVATION_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// bcrypt accepts work factors in this range.
pub const BCRYPT_COST_RANGE: std::ops::RangeInclusive<u32> = 4..=31;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than zero"));
    }
    if config.timeouts.store_secs == 0 {
        errors.push(ValidationError::new("timeouts.store_secs", "must be greater than zero"));
    }

    let limits = &config.rate_limit;
    if !(limits.requests_per_second.is_finite() && limits.requests_per_second > 0.0) {
        errors.push(ValidationError::new(
            "rate_limit.requests_per_second",
            "must be a positive number",
        ));
    }
    if limits.burst_size == 0 {
        errors.push(ValidationError::new("rate_limit.burst_size", "must be greater than zero"));
    }
    if limits.idle_secs == 0 {
        errors.push(ValidationError::new("rate_limit.idle_secs", "must be greater than zero"));
    }
    if limits.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "rate_limit.sweep_interval_secs",
            "must be greater than zero",
        ));
    }

    let auth = &config.auth;
    if auth.jwt_secret.is_empty() {
        errors.push(ValidationError::new("auth.jwt_secret", "must be provided"));
    } else if auth.jwt_secret.len() < MIN_SECRET_LEN {
        errors.push(ValidationError::new(
            "auth.jwt_secret",
            format!("must be at least {MIN_SECRET_LEN} bytes long"),
        ));
    }
    if auth.issuer.is_empty() {
        errors.push(ValidationError::new("auth.issuer", "must be provided"));
    }
    if auth.audience.is_empty() {
        errors.push(ValidationError::new("auth.audience", "must be provided"));
    }
    if auth.token_lifetime_secs == 0 {
        errors.push(ValidationError::new("auth.token_lifetime_secs", "must be greater than zero"));
    }

    if config.activation.ttl_secs == 0 {
        errors.push(ValidationError::new("activation.ttl_secs", "must be greater than zero"));
    } else if config.activation.ttl_secs > MAX_ACTIVATION_TTL_SECS {
        errors.push(ValidationError::new(
            "activation.ttl_secs",
            format!("must not exceed {MAX_ACTIVATION_TTL_SECS} seconds"),
        ));
    }

    if !BCRYPT_COST_RANGE.contains(&config.password.bcrypt_cost) {
        errors.push(ValidationError::new(
            "password.bcrypt_cost",
            format!(
                "must be between {} and {}",
                BCRYPT_COST_RANGE.start(),
                BCRYPT_COST_RANGE.end()
            ),
        ));
    }

    if config.database.dsn.is_some() && config.database.max_connections == 0 {
        errors.push(ValidationError::new("database.max_connections", "must be greater than zero"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> GateConfig {
        let mut config = GateConfig::default();
        config.auth.jwt_secret = "0123456789abcdef0123456789abcdef".into();
        config
    }

    fn fields(config: &GateConfig) -> Vec<&'static str> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|err| err.field)
            .collect()
    }

    #[test]
    fn test_defaults_with_secret_are_valid() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_missing_secret_rejected() {
        assert_eq!(fields(&GateConfig::default()), vec!["auth.jwt_secret"]);

        let mut short = valid();
        short.auth.jwt_secret = "too-short".into();
        let errors = validate_config(&short).unwrap_err();
        assert!(errors[0].message.contains("32"));
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = valid();
        config.listener.bind_address = "not an address".into();
        config.rate_limit.burst_size = 0;
        config.rate_limit.requests_per_second = 0.0;
        config.password.bcrypt_cost = 3;
        config.auth.token_lifetime_secs = 0;
        config.activation.ttl_secs = 0;

        let found = fields(&config);
        for expected in [
            "listener.bind_address",
            "rate_limit.burst_size",
            "rate_limit.requests_per_second",
            "password.bcrypt_cost",
            "auth.token_lifetime_secs",
            "activation.ttl_secs",
        ] {
            assert!(found.contains(&expected), "missing {expected} in {found:?}");
        }
    }

    #[test]
    fn test_bcrypt_cost_bounds() {
        let mut config = valid();
        config.password.bcrypt_cost = 31;
        assert!(validate_config(&config).is_ok());
        config.password.bcrypt_cost = 32;
        assert_eq!(fields(&config), vec!["password.bcrypt_cost"]);
    }

    #[test]
    fn test_nan_rate_rejected() {
        let mut config = valid();
        config.rate_limit.requests_per_second = f64::NAN;
        assert_eq!(fields(&config), vec!["rate_limit.requests_per_second"]);
    }

    #[test]
    fn test_activation_ttl_upper_bound() {
        let mut config = valid();
        config.activation.ttl_secs = MAX_ACTIVATION_TTL_SECS;
        assert!(validate_config(&config).is_ok());
        config.activation.ttl_secs = MAX_ACTIVATION_TTL_SECS + 1;
        assert_eq!(fields(&config), vec!["activation.ttl_secs"]);
    }
}
