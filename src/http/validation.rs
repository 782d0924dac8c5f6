//! Field-level input checks that accumulate into one 422 response.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::http::error::{ApiError, FieldError};

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Normalize an email for lookup and uniqueness checks.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic format check on already-normalized input.
pub fn valid_email(email: &str) -> bool {
    EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email))
}

pub fn unique<T: std::hash::Hash + Eq>(values: &[T]) -> bool {
    let mut seen = HashSet::with_capacity(values.len());
    values.iter().all(|value| seen.insert(value))
}

#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` for `field` unless `ok`. Only the first failure per
    /// field is kept.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) -> &mut Self {
        if !ok && !self.errors.iter().any(|err| err.field == field) {
            self.errors.push(FieldError::new(field, message));
        }
        self
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self.errors))
        }
    }
}
