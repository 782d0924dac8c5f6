//! Capability checks for protected routes.
//!
//! Checks run in a fixed order and stop at the first failure:
//! anonymous → `AuthenticationRequired`, not activated → `AccountInactive`,
//! capability missing → `Forbidden`. The permission set is read from the
//! directory on every call; nothing is cached between requests.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::auth::principal::{Principal, PrincipalRecord};
use crate::http::error::ApiError;
use crate::store::{PrincipalDirectory, StoreError};

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("account is not activated")]
    AccountInactive,

    #[error("missing capability {0}")]
    Forbidden(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::AuthenticationRequired => ApiError::AuthenticationRequired,
            AccessError::AccountInactive => ApiError::AccountInactive,
            AccessError::Forbidden(_) => ApiError::Forbidden,
            AccessError::Store(err) => ApiError::from(err),
        }
    }
}

#[derive(Clone)]
pub struct PermissionGate {
    directory: Arc<dyn PrincipalDirectory>,
}

impl PermissionGate {
    pub fn new(directory: Arc<dyn PrincipalDirectory>) -> Self {
        Self { directory }
    }

    /// Authenticated and activated, without consulting permissions.
    pub fn require_activated<'p>(&self, principal: &'p Principal) -> Result<&'p PrincipalRecord, AccessError> {
        let record = principal.record().ok_or(AccessError::AuthenticationRequired)?;
        if !record.activated {
            return Err(AccessError::AccountInactive);
        }
        Ok(record)
    }

    pub async fn require(&self, principal: &Principal, capability: &str) -> Result<(), AccessError> {
        let record = self.require_activated(principal)?;
        let permissions = self.directory.permissions_for(record.id).await?;
        if permissions.includes(capability) {
            Ok(())
        } else {
            Err(AccessError::Forbidden(capability.to_string()))
        }
    }
}

/// Route-level guard state: which capability the wrapped handler needs.
#[derive(Clone)]
pub struct RequirePermission {
    pub gate: PermissionGate,
    pub capability: &'static str,
}

fn principal_of(request: &Request) -> Principal {
    request
        .extensions()
        .get::<Principal>()
        .cloned()
        .unwrap_or(Principal::Anonymous)
}

pub async fn require_permission(
    State(guard): State<RequirePermission>,
    request: Request,
    next: Next,
) -> Response {
    let principal = principal_of(&request);
    match guard.gate.require(&principal, guard.capability).await {
        Ok(()) => next.run(request).await,
        Err(err) => {
            if let AccessError::Forbidden(capability) = &err {
                tracing::info!(principal_id = principal.id(), capability = %capability, "Permission denied");
            }
            ApiError::from(err).into_response()
        }
    }
}

pub async fn require_activated(
    State(gate): State<PermissionGate>,
    request: Request,
    next: Next,
) -> Response {
    let principal = principal_of(&request);
    match gate.require_activated(&principal) {
        Ok(_) => next.run(request).await,
        Err(err) => ApiError::from(err).into_response(),
    }
}
