//! Stateless bearer tokens.
//!
//! # Responsibilities
//! - Issue HMAC-signed tokens carrying a principal id and a validity window
//! - Verify signature, algorithm, issuer, audience and `[nbf, exp)` window
//!
//! # Design Decisions
//! - Compact JWS layout: `base64url(header).base64url(claims).base64url(mac)`
//! - Only the HMAC family (HS256/HS384/HS512) is accepted on verify; anything
//!   else, including `none`, is rejected before the signature is looked at
//! - Verification is a pure function of (token, now, secret); no locking

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;

use crate::auth::principal::PrincipalId;
use crate::config::AuthConfig;

const ISSUE_ALGORITHM: &str = "HS256";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token format")]
    Malformed,
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token has no expiry")]
    MissingExpiry,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("invalid subject")]
    InvalidSubject,
    #[error("signing key rejected")]
    Key,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// `aud` may be a single string or an array of strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }
}

/// Registered claims carried by a bearer token. Times are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
}

/// A freshly signed token and the instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expiry: i64,
}

/// Issues and verifies bearer tokens with a server-held secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Arc<[u8]>,
    issuer: String,
    audience: String,
    lifetime: Duration,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"**redacted**")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl TokenCodec {
    pub fn new(
        secret: impl AsRef<[u8]>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        lifetime: Duration,
    ) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            issuer: issuer.into(),
            audience: audience.into(),
            lifetime,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.jwt_secret.as_bytes(),
            config.issuer.clone(),
            config.audience.clone(),
            Duration::from_secs(config.token_lifetime_secs),
        )
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Issue a token for `principal_id`, valid from now for the configured lifetime.
    pub fn issue(&self, principal_id: PrincipalId) -> Result<IssuedToken, TokenError> {
        self.issue_at(principal_id, Utc::now().timestamp())
    }

    pub fn issue_at(&self, principal_id: PrincipalId, now: i64) -> Result<IssuedToken, TokenError> {
        let lifetime = i64::try_from(self.lifetime.as_secs()).map_err(|_| TokenError::Key)?;
        let expiry = now.saturating_add(lifetime);
        let claims = Claims {
            sub: principal_id.to_string(),
            iat: Some(now),
            nbf: Some(now),
            exp: Some(expiry),
            iss: Some(self.issuer.clone()),
            aud: Some(Audience::One(self.audience.clone())),
        };
        let header = Header {
            alg: ISSUE_ALGORITHM.to_string(),
            typ: Some("JWT".to_string()),
        };

        let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(&claims)?);
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret).map_err(|_| TokenError::Key)?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(IssuedToken {
            token: format!("{signing_input}.{signature}"),
            expiry,
        })
    }

    /// Verify `token` against the current time and return its subject.
    pub fn verify(&self, token: &str) -> Result<PrincipalId, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify `token` as of `now` (unix seconds). Valid iff `nbf <= now < exp`.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<PrincipalId, TokenError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::Malformed);
        };

        let header: Header = b64d_json(header_b64)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::InvalidSignature)?;

        // The signing input is the exact bytes that were presented.
        let signing_input = &token[..header_b64.len() + 1 + claims_b64.len()];
        let verified = match header.alg.as_str() {
            "HS256" => verify_mac::<Hmac<Sha256>>(&self.secret, signing_input, &signature),
            "HS384" => verify_mac::<Hmac<Sha384>>(&self.secret, signing_input, &signature),
            "HS512" => verify_mac::<Hmac<Sha512>>(&self.secret, signing_input, &signature),
            other => return Err(TokenError::UnsupportedAlgorithm(other.to_string())),
        }?;
        if !verified {
            return Err(TokenError::InvalidSignature);
        }

        let claims: Claims = b64d_json(claims_b64)?;
        self.validate_claims(&claims, now)?;

        claims
            .sub
            .parse::<PrincipalId>()
            .map_err(|_| TokenError::InvalidSubject)
    }

    fn validate_claims(&self, claims: &Claims, now: i64) -> Result<(), TokenError> {
        let expiry = claims.exp.ok_or(TokenError::MissingExpiry)?;
        if now >= expiry {
            return Err(TokenError::Expired);
        }
        if claims.nbf.is_some_and(|nbf| now < nbf) {
            return Err(TokenError::NotYetValid);
        }
        if claims.iss.as_deref() != Some(self.issuer.as_str()) {
            return Err(TokenError::InvalidIssuer);
        }
        if !claims
            .aud
            .as_ref()
            .is_some_and(|aud| aud.contains(&self.audience))
        {
            return Err(TokenError::InvalidAudience);
        }
        Ok(())
    }
}

fn verify_mac<M>(secret: &[u8], input: &str, signature: &[u8]) -> Result<bool, TokenError>
where
    M: Mac + hmac::digest::KeyInit,
{
    let mut mac = <M as Mac>::new_from_slice(secret).map_err(|_| TokenError::Key)?;
    mac.update(input.as_bytes());
    Ok(mac.verify_slice(signature).is_ok())
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|_| TokenError::Malformed)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}
