//! Request authentication.
//!
//! Resolves the `Authorization` header into a [`Principal`] and stores it in
//! the request extensions. An absent header is not an error: the request
//! continues as [`Principal::Anonymous`] and the route guards decide.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::auth::principal::Principal;
use crate::auth::token::{TokenCodec, TokenError};
use crate::http::error::ApiError;
use crate::observability::metrics;
use crate::store::{PrincipalDirectory, StoreError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid authorization header")]
    MalformedHeader,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("token subject no longer exists")]
    UnknownSubject,

    #[error(transparent)]
    Store(StoreError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MalformedHeader | AuthError::InvalidToken(_) | AuthError::UnknownSubject => {
                ApiError::InvalidToken
            }
            AuthError::Store(err) => ApiError::from(err),
        }
    }
}

#[derive(Clone)]
pub struct AuthPipeline {
    codec: Arc<TokenCodec>,
    directory: Arc<dyn PrincipalDirectory>,
}

impl AuthPipeline {
    pub fn new(codec: Arc<TokenCodec>, directory: Arc<dyn PrincipalDirectory>) -> Self {
        Self { codec, directory }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Ok(Principal::Anonymous);
        };
        let token = bearer_token(value.to_str().map_err(|_| AuthError::MalformedHeader)?)?;
        let id = self.codec.verify(token)?;

        match self.directory.principal_by_id(id).await {
            Ok(record) => Ok(Principal::Authenticated(record)),
            // A validly signed token for a principal that has since been removed.
            Err(StoreError::NotFound) => Err(AuthError::UnknownSubject),
            Err(err) => Err(AuthError::Store(err)),
        }
    }
}

/// Exactly two space-separated parts, the first being `Bearer`.
fn bearer_token(value: &str) -> Result<&str, AuthError> {
    let parts: Vec<&str> = value.split(' ').collect();
    match parts.as_slice() {
        ["Bearer", token] if !token.is_empty() => Ok(token),
        _ => Err(AuthError::MalformedHeader),
    }
}

/// Middleware: attach the resolved principal or reject with 401.
pub async fn authenticate(
    State(pipeline): State<AuthPipeline>,
    mut request: Request,
    next: Next,
) -> Response {
    match pipeline.authenticate(request.headers()).await {
        Ok(principal) => {
            if let Some(id) = principal.id() {
                tracing::debug!(principal_id = id, "Authenticated request");
            }
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(AuthError::Store(err)) => ApiError::from(err).into_response(),
        Err(err) => {
            tracing::info!(error = %err, "Rejected bearer token");
            metrics::record_auth_failure("invalid_token");
            ApiError::from(err).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::HeaderValue;

    use crate::auth::principal::NewPrincipal;
    use crate::store::MemoryStore;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    async fn pipeline() -> (AuthPipeline, i64) {
        let store = Arc::new(MemoryStore::new());
        let record = store
            .insert_principal(NewPrincipal {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                password_hash: "$2b$04$hash".into(),
                activated: true,
            })
            .await
            .unwrap();
        let codec = Arc::new(TokenCodec::new(SECRET, "gatekeeper", "gatekeeper", Duration::from_secs(3600)));
        (AuthPipeline::new(codec, store), record.id)
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_absent_header_is_anonymous() {
        let (pipeline, _) = pipeline().await;
        let principal = pipeline.authenticate(&HeaderMap::new()).await.unwrap();
        assert!(principal.is_anonymous());
    }

    #[tokio::test]
    async fn test_valid_bearer_token() {
        let (pipeline, id) = pipeline().await;
        let issued = pipeline.codec().issue(id).unwrap();
        let principal = pipeline
            .authenticate(&headers(&format!("Bearer {}", issued.token)))
            .await
            .unwrap();
        assert_eq!(principal.id(), Some(id));
    }

    #[tokio::test]
    async fn test_malformed_headers_rejected() {
        let (pipeline, id) = pipeline().await;
        let token = pipeline.codec().issue(id).unwrap().token;

        for value in [
            token.clone(),
            format!("Basic {token}"),
            format!("Bearer {token} extra"),
            format!("Bearer  {token}"),
            "Bearer ".to_string(),
            format!("bearer {token}"),
        ] {
            let result = pipeline.authenticate(&headers(&value)).await;
            assert!(
                matches!(result, Err(AuthError::MalformedHeader)),
                "accepted {value:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_bad_signature_is_invalid_token() {
        let (pipeline, id) = pipeline().await;
        let other = TokenCodec::new("another-secret-another-secret-00", "gatekeeper", "gatekeeper", Duration::from_secs(60));
        let forged = other.issue(id).unwrap().token;
        let result = pipeline.authenticate(&headers(&format!("Bearer {forged}"))).await;
        assert!(matches!(result, Err(AuthError::InvalidToken(TokenError::InvalidSignature))));
    }

    #[tokio::test]
    async fn test_deleted_subject_is_invalid_token() {
        let (pipeline, _) = pipeline().await;
        let token = pipeline.codec().issue(999).unwrap().token;
        let result = pipeline.authenticate(&headers(&format!("Bearer {token}"))).await;
        assert!(matches!(result, Err(AuthError::UnknownSubject)));
        assert!(matches!(
            ApiError::from(result.unwrap_err()),
            ApiError::InvalidToken
        ));
    }
}
