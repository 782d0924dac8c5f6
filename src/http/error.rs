//! The single error type every handler and guard rejects with.
//!
//! Rendered as `{"error": <string | [{field, message}]>}`. Server-side
//! failures are logged in full and answered with an opaque message.

use std::any::Any;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Json, Request};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

pub const SERVER_ERROR_MESSAGE: &str =
    "the server encountered a problem and could not process your request";

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid or missing authentication token")]
    InvalidToken,

    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,

    #[error("invalid authentication credentials")]
    InvalidCredentials,

    #[error("your user account must be activated to access this resource")]
    AccountInactive,

    #[error("your user account doesn't have the necessary permissions to access this resource")]
    Forbidden,

    #[error("rate limit exceeded")]
    Throttled,

    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("the requested resource could not be found")]
    NotFound,

    #[error("the {0} method is not supported for this resource")]
    MethodNotAllowed(Method),

    #[error("{0}")]
    BadRequest(String),

    #[error("request failed validation")]
    Validation(Vec<FieldError>),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidToken | ApiError::AuthenticationRequired | ApiError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::AccountInactive | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Throttled => StatusCode::TOO_MANY_REQUESTS,
            ApiError::EditConflict => StatusCode::CONFLICT,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::EditConflict => ApiError::EditConflict,
            StoreError::DuplicateEmail => {
                ApiError::field("email", "a user with this email address already exists")
            }
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Validation(fields) => json!({ "error": fields }),
            ApiError::Internal(err) => {
                // Runs inside the request span, which carries method, route and request id.
                tracing::error!(error = ?err, "request failed");
                json!({ "error": SERVER_ERROR_MESSAGE })
            }
            other => json!({ "error": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if matches!(self, ApiError::InvalidToken) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// `Json<T>` whose rejections render through [`ApiError`] as 400s.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

/// Converts a panic caught at the outermost layer into the generic 500.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(panic = %detail, "request handler panicked");

    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": SERVER_ERROR_MESSAGE })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::AuthenticationRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::AccountInactive.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Throttled.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::EditConflict.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(StoreError::DuplicateEmail).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn test_validation_envelope_is_field_list() {
        let response = ApiError::field("token", "invalid or expired activation token").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(body["error"][0]["field"], "token");
        assert_eq!(body["error"][0]["message"], "invalid or expired activation token");
    }

    #[tokio::test]
    async fn test_internal_error_is_opaque() {
        let err = ApiError::from(StoreError::Timeout(std::time::Duration::from_secs(3)));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], SERVER_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_invalid_token_challenges_bearer() {
        let response = ApiError::InvalidToken.into_response();
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid or missing authentication token");
    }

    #[tokio::test]
    async fn test_panic_response_closes_connection() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::CONNECTION], "close");
        let body = body_json(response).await;
        assert_eq!(body["error"], SERVER_ERROR_MESSAGE);
    }
}
