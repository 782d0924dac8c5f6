//! Single-use side-channel tokens (account activation).
//!
//! # Responsibilities
//! - Generate high-entropy plaintext tokens and persist only their digest
//! - Look tokens up by (digest, scope) while unexpired
//! - Activate the owning principal and consume its tokens in one store step
//!
//! # Design Decisions
//! - The plaintext is returned exactly once and never stored or logged
//! - A token is single-use per scope: consuming one deletes every token of
//!   that scope held by the same principal

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::auth::principal::{PrincipalId, PrincipalRecord};
use crate::store::{StoreError, TokenRepository};

/// Bytes of entropy per token.
const TOKEN_BYTES: usize = 32;

/// Length of an encoded plaintext token.
pub const PLAINTEXT_LEN: usize = 43;

/// What a stored token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenScope {
    Activation,
}

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Activation => "activation",
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted form of a token. Holds the digest, never the plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub hash: Vec<u8>,
    pub principal_id: PrincipalId,
    pub expiry: DateTime<Utc>,
    pub scope: TokenScope,
}

impl TokenRecord {
    /// True when this record is the unexpired `scope` token with digest `hash`.
    pub fn matches(&self, scope: TokenScope, hash: &[u8], now: DateTime<Utc>) -> bool {
        self.scope == scope && self.hash == hash && now < self.expiry
    }
}

/// A freshly issued token: the plaintext for out-of-band delivery plus
/// the record that was stored.
pub struct ActivationToken {
    pub plaintext: String,
    pub record: TokenRecord,
}

impl fmt::Debug for ActivationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationToken")
            .field("plaintext", &"<redacted>")
            .field("record", &self.record)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("failed to gather token entropy")]
    Entropy(#[source] rand::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One-way digest of a plaintext token.
pub fn hash_token(plaintext: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hasher.finalize().to_vec()
}

fn generate_plaintext() -> Result<String, ActivationError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.try_fill_bytes(&mut bytes).map_err(ActivationError::Entropy)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[derive(Clone)]
pub struct ActivationTokenStore {
    repo: Arc<dyn TokenRepository>,
}

impl ActivationTokenStore {
    pub fn new(repo: Arc<dyn TokenRepository>) -> Self {
        Self { repo }
    }

    pub async fn issue(
        &self,
        principal_id: PrincipalId,
        ttl: Duration,
        scope: TokenScope,
    ) -> Result<ActivationToken, ActivationError> {
        let plaintext = generate_plaintext()?;
        let record = TokenRecord {
            hash: hash_token(&plaintext),
            principal_id,
            expiry: Utc::now() + ttl,
            scope,
        };
        self.repo.insert_token(&record).await?;
        Ok(ActivationToken { plaintext, record })
    }

    /// Owner of an unexpired token. Does not consume it; callers that act on
    /// the result must follow up with [`invalidate`](Self::invalidate), or
    /// use [`activate`](Self::activate) which does both atomically.
    pub async fn redeem(&self, scope: TokenScope, plaintext: &str) -> Result<PrincipalRecord, StoreError> {
        self.redeem_at(scope, plaintext, Utc::now()).await
    }

    pub async fn redeem_at(
        &self,
        scope: TokenScope,
        plaintext: &str,
        now: DateTime<Utc>,
    ) -> Result<PrincipalRecord, StoreError> {
        self.repo
            .principal_for_token(scope, &hash_token(plaintext), now)
            .await
    }

    /// Delete every `scope` token held by `principal_id`.
    pub async fn invalidate(&self, scope: TokenScope, principal_id: PrincipalId) -> Result<(), StoreError> {
        self.repo.delete_tokens_for(scope, principal_id).await
    }

    /// Mark the owner activated and consume all of its `scope` tokens as a
    /// single store operation. `NotFound` for an unknown or expired token.
    pub async fn activate(&self, scope: TokenScope, plaintext: &str) -> Result<PrincipalRecord, StoreError> {
        self.repo
            .activate_with_token(scope, &hash_token(plaintext), Utc::now())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::NewPrincipal;
    use crate::store::{MemoryStore, PrincipalDirectory};

    async fn setup() -> (Arc<MemoryStore>, ActivationTokenStore, PrincipalRecord) {
        let store = Arc::new(MemoryStore::new());
        let principal = store
            .insert_principal(NewPrincipal {
                name: "Lin".into(),
                email: "lin@example.com".into(),
                password_hash: "$2b$04$hash".into(),
                activated: false,
            })
            .await
            .unwrap();
        let tokens = ActivationTokenStore::new(store.clone());
        (store, tokens, principal)
    }

    #[tokio::test]
    async fn test_plaintext_is_never_stored() {
        let (_store, tokens, principal) = setup().await;
        let issued = tokens
            .issue(principal.id, Duration::days(3), TokenScope::Activation)
            .await
            .unwrap();

        assert_eq!(issued.plaintext.len(), PLAINTEXT_LEN);
        assert_ne!(issued.record.hash, issued.plaintext.as_bytes());
        assert_eq!(issued.record.hash, hash_token(&issued.plaintext));
        assert!(!format!("{issued:?}").contains(&issued.plaintext));
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let (_store, tokens, principal) = setup().await;
        let a = tokens.issue(principal.id, Duration::days(3), TokenScope::Activation).await.unwrap();
        let b = tokens.issue(principal.id, Duration::days(3), TokenScope::Activation).await.unwrap();
        assert_ne!(a.plaintext, b.plaintext);
    }

    #[tokio::test]
    async fn test_redeem_once_after_invalidation() {
        let (_store, tokens, principal) = setup().await;
        let issued = tokens
            .issue(principal.id, Duration::days(3), TokenScope::Activation)
            .await
            .unwrap();

        let owner = tokens.redeem(TokenScope::Activation, &issued.plaintext).await.unwrap();
        assert_eq!(owner.id, principal.id);

        tokens.invalidate(TokenScope::Activation, owner.id).await.unwrap();
        let replay = tokens.redeem(TokenScope::Activation, &issued.plaintext).await;
        assert!(matches!(replay, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_redeem_after_expiry_fails_before_deletion() {
        let (store, tokens, principal) = setup().await;
        let issued = tokens
            .issue(principal.id, Duration::minutes(5), TokenScope::Activation)
            .await
            .unwrap();

        let result = tokens
            .redeem_at(TokenScope::Activation, &issued.plaintext, issued.record.expiry)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound)));
        assert_eq!(store.token_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_plaintext_not_found() {
        let (_store, tokens, _principal) = setup().await;
        let result = tokens.redeem(TokenScope::Activation, "not-a-real-token").await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_activate_bumps_version_and_consumes_tokens() {
        let (store, tokens, principal) = setup().await;
        let first = tokens.issue(principal.id, Duration::days(3), TokenScope::Activation).await.unwrap();
        let second = tokens.issue(principal.id, Duration::days(3), TokenScope::Activation).await.unwrap();

        let activated = tokens.activate(TokenScope::Activation, &first.plaintext).await.unwrap();
        assert!(activated.activated);
        assert_eq!(activated.version, principal.version + 1);
        assert_eq!(store.token_count(), 0);

        let replay = tokens.activate(TokenScope::Activation, &second.plaintext).await;
        assert!(matches!(replay, Err(StoreError::NotFound)));
        let stored = store.principal_by_id(principal.id).await.unwrap();
        assert_eq!(stored.version, principal.version + 1);
    }

    #[test]
    fn test_scope_names() {
        assert_eq!(TokenScope::Activation.as_str(), "activation");
        assert_eq!(TokenScope::Activation.to_string(), "activation");
    }
}
