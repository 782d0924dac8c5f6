//! Principals: who is making a request.
//!
//! A request is always attributed to exactly one [`Principal`]. An
//! unauthenticated caller is the [`Principal::Anonymous`] variant, so "is
//! anonymous" is a pattern match rather than an identity comparison.

use std::collections::HashSet;
use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::concurrency::Versioned;

/// Unique principal identifier.
pub type PrincipalId = i64;

/// A stored principal (registered account).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrincipalRecord {
    pub id: PrincipalId,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    /// bcrypt hash; never serialized.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub activated: bool,
    /// Optimistic-lock anchor. Only the store increments it.
    #[serde(skip_serializing)]
    pub version: i32,
}

impl Versioned for PrincipalRecord {
    type Id = PrincipalId;

    fn id(&self) -> PrincipalId {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn set_version(&mut self, version: i32) {
        self.version = version;
    }
}

/// Fields supplied at registration; the store assigns id, timestamps and version.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub activated: bool,
}

/// The actor attached to every request by the authentication pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Authenticated(PrincipalRecord),
    Anonymous,
}

impl Principal {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    pub fn record(&self) -> Option<&PrincipalRecord> {
        match self {
            Principal::Authenticated(record) => Some(record),
            Principal::Anonymous => None,
        }
    }

    pub fn id(&self) -> Option<PrincipalId> {
        self.record().map(|record| record.id)
    }
}

/// Handlers and guards read the principal placed in the request extensions.
/// A request that never went through the pipeline is treated as anonymous.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Principal>()
            .cloned()
            .unwrap_or(Principal::Anonymous))
    }
}

/// Capability codes held by a principal, e.g. `movies:write`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(HashSet<String>);

impl PermissionSet {
    pub fn includes(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
