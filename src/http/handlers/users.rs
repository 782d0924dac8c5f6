//! Registration, activation and credential exchange.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::activation::{TokenScope, PLAINTEXT_LEN};
use crate::auth::password::MAX_PASSWORD_BYTES;
use crate::auth::principal::NewPrincipal;
use crate::http::error::{ApiError, JsonBody};
use crate::http::server::AppState;
use crate::http::validation::{normalize_email, valid_email, Validator};
use crate::notify::ActivationMessage;
use crate::observability::metrics;
use crate::store::StoreError;

/// Granted to every new account.
pub const DEFAULT_PERMISSIONS: &[&str] = &["movies:read"];

const MIN_PASSWORD_LEN: usize = 6;
const MAX_NAME_BYTES: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivateInput {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsInput {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

fn check_password(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided")
        .check(
            password.chars().count() >= MIN_PASSWORD_LEN,
            "password",
            "must be at least 6 characters long",
        )
        .check(
            password.len() <= MAX_PASSWORD_BYTES,
            "password",
            "must not be more than 72 bytes long",
        );
}

fn check_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided")
        .check(valid_email(email), "email", "must be a valid email address");
}

/// `POST /v1/users`
pub async fn register_user(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<RegisterInput>,
) -> Result<Json<Value>, ApiError> {
    let name = input.name.trim().to_string();
    let email = normalize_email(&input.email);

    let mut v = Validator::new();
    v.check(!name.is_empty(), "name", "must be provided")
        .check(name.len() <= MAX_NAME_BYTES, "name", "must not be more than 500 bytes long");
    check_email(&mut v, &email);
    check_password(&mut v, &input.password);
    v.finish()?;

    let verifier = state.verifier;
    let password = input.password;
    let password_hash = tokio::task::spawn_blocking(move || verifier.set_password(&password))
        .await
        .map_err(anyhow::Error::new)?
        .map_err(anyhow::Error::new)?;

    let principal = state
        .backend
        .directory
        .insert_principal(NewPrincipal {
            name,
            email,
            password_hash,
            activated: false,
        })
        .await?;
    state
        .backend
        .directory
        .grant_permissions(principal.id, DEFAULT_PERMISSIONS)
        .await?;

    let token = state
        .activation
        .issue(principal.id, state.activation_ttl, TokenScope::Activation)
        .await
        .map_err(anyhow::Error::new)?;

    let message = ActivationMessage {
        recipient: principal.email.clone(),
        name: principal.name.clone(),
        principal_id: principal.id,
        token: token.plaintext,
    };
    let notifier = state.notifier.clone();
    state.background.spawn("activation_notice", async move {
        if let Err(err) = notifier.send_activation(&message).await {
            tracing::error!(principal_id = message.principal_id, error = %err, "Activation notice failed");
        }
    });

    tracing::info!(principal_id = principal.id, "Principal registered");
    Ok(Json(json!({ "user": principal })))
}

/// `PUT /v1/users/activate`
pub async fn activate_user(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<ActivateInput>,
) -> Result<StatusCode, ApiError> {
    let mut v = Validator::new();
    v.check(!input.token.is_empty(), "token", "must be provided")
        .check(
            input.token.len() == PLAINTEXT_LEN,
            "token",
            "invalid or expired activation token",
        );
    v.finish()?;

    match state.activation.activate(TokenScope::Activation, &input.token).await {
        Ok(principal) => {
            tracing::info!(principal_id = principal.id, version = principal.version, "Principal activated");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(StoreError::NotFound) => Err(ApiError::field("token", "invalid or expired activation token")),
        Err(err) => Err(err.into()),
    }
}

/// `PUT /v1/users/auth`
pub async fn authenticate_user(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<CredentialsInput>,
) -> Result<Json<Value>, ApiError> {
    let email = normalize_email(&input.email);

    let mut v = Validator::new();
    check_email(&mut v, &email);
    v.check(!input.password.is_empty(), "password", "must be provided");
    v.finish()?;

    let principal = match state.backend.directory.principal_by_email(&email).await {
        Ok(principal) => principal,
        Err(StoreError::NotFound) => {
            metrics::record_auth_failure("invalid_credentials");
            return Err(ApiError::InvalidCredentials);
        }
        Err(err) => return Err(err.into()),
    };

    let verifier = state.verifier;
    let password = input.password;
    let stored_hash = principal.password_hash.clone();
    let matched = tokio::task::spawn_blocking(move || verifier.matches(&password, &stored_hash))
        .await
        .map_err(anyhow::Error::new)?
        .map_err(anyhow::Error::new)?;
    if !matched {
        metrics::record_auth_failure("invalid_credentials");
        return Err(ApiError::InvalidCredentials);
    }

    let issued = state.codec.issue(principal.id).map_err(anyhow::Error::new)?;
    tracing::info!(principal_id = principal.id, "Issued authentication token");
    Ok(Json(json!({
        "authentication_token": issued.token,
        "expiry": issued.expiry,
    })))
}
