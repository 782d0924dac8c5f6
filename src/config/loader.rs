//! Configuration loading from disk and environment.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::GateConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Overrides `auth.jwt_secret`.
pub const ENV_JWT_SECRET: &str = "GATEKEEPER_JWT_SECRET";

/// Overrides `database.dsn`.
pub const ENV_DB_DSN: &str = "GATEKEEPER_DB_DSN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load the file (if any), apply environment overrides, then validate.
pub fn load_config(path: Option<&Path>) -> Result<GateConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_file(path)?,
        None => GateConfig::default(),
    };
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn parse_file(path: &Path) -> Result<GateConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Secrets usually arrive through the environment rather than the file.
pub fn apply_overrides<F>(config: &mut GateConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(secret) = lookup(ENV_JWT_SECRET).filter(|value| !value.is_empty()) {
        config.auth.jwt_secret = secret;
    }
    if let Some(dsn) = lookup(ENV_DB_DSN).filter(|value| !value.is_empty()) {
        config.database.dsn = Some(dsn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = GateConfig::default();
        config.auth.jwt_secret = "from-file".into();
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_JWT_SECRET, "from-env-0123456789abcdef0123456789"),
            (ENV_DB_DSN, "postgres://localhost/gate"),
        ]);

        apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.auth.jwt_secret, "from-env-0123456789abcdef0123456789");
        assert_eq!(config.database.dsn.as_deref(), Some("postgres://localhost/gate"));
    }

    #[test]
    fn test_empty_override_ignored() {
        let mut config = GateConfig::default();
        config.auth.jwt_secret = "from-file".into();
        apply_overrides(&mut config, |_| Some(String::new()));
        assert_eq!(config.auth.jwt_secret, "from-file");
        assert!(config.database.dsn.is_none());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = parse_file(Path::new("/nonexistent/gatekeeper.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_validation_error_lists_fields() {
        let err = ConfigError::Validation(vec![
            ValidationError {
                field: "auth.jwt_secret",
                message: "must be provided".into(),
            },
            ValidationError {
                field: "rate_limit.burst_size",
                message: "must be greater than zero".into(),
            },
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("auth.jwt_secret: must be provided"));
        assert!(rendered.contains("rate_limit.burst_size"));
    }
}
