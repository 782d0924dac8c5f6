//! Storage subsystem.
//!
//! # Data Flow
//! ```text
//! auth pipeline / permission gate
//!     → PrincipalDirectory (principal lookup, permission sets)
//! activation flow
//!     → TokenRepository (hashed single-use tokens, atomic activation)
//! resource handlers
//!     → concurrency.rs (version-checked mutation)
//!     → MovieRepository (conditional update, unconditional delete)
//! ```
//!
//! # Design Decisions
//! - The core owns no storage; every backend implements the traits below
//! - Conditional writes are the backend's compare-and-swap, never an in-process lock
//! - Backend calls that leave the process carry a deadline (`with_deadline`)

pub mod concurrency;
pub mod memory;
pub mod movie;
pub mod postgres;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::activation::{TokenRecord, TokenScope};
use crate::auth::principal::{NewPrincipal, PermissionSet, PrincipalId, PrincipalRecord};
use crate::store::movie::{Movie, MovieId, NewMovie};

pub use concurrency::ConcurrencyGuard;
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("edit conflict")]
    EditConflict,

    #[error("duplicate email")]
    DuplicateEmail,

    #[error("store call exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// Bound a backend call so a stalled store cannot hang a worker.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}

/// Resolves principals and their permission sets.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Fails with [`StoreError::DuplicateEmail`] when the email is taken.
    async fn insert_principal(&self, principal: NewPrincipal) -> Result<PrincipalRecord, StoreError>;

    async fn principal_by_id(&self, id: PrincipalId) -> Result<PrincipalRecord, StoreError>;

    async fn principal_by_email(&self, email: &str) -> Result<PrincipalRecord, StoreError>;

    /// Conditional write: succeeds only while the stored version equals
    /// `principal.version`, returning the incremented version.
    async fn update_principal(&self, principal: &PrincipalRecord) -> Result<i32, StoreError>;

    async fn permissions_for(&self, id: PrincipalId) -> Result<PermissionSet, StoreError>;

    async fn grant_permissions(&self, id: PrincipalId, codes: &[&str]) -> Result<(), StoreError>;
}

/// Persists hashed side-channel tokens.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert_token(&self, record: &TokenRecord) -> Result<(), StoreError>;

    /// Owner of a token with this hash and scope that is still valid at `now`.
    async fn principal_for_token(
        &self,
        scope: TokenScope,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<PrincipalRecord, StoreError>;

    async fn delete_tokens_for(&self, scope: TokenScope, principal_id: PrincipalId) -> Result<(), StoreError>;

    /// In one atomic step: find the owner of a valid token, activate it with a
    /// version check, and delete every token of `scope` it holds.
    async fn activate_with_token(
        &self,
        scope: TokenScope,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<PrincipalRecord, StoreError>;
}

/// Versioned catalog records.
#[async_trait]
pub trait MovieRepository: Send + Sync {
    async fn insert_movie(&self, movie: NewMovie) -> Result<Movie, StoreError>;

    async fn movie_by_id(&self, id: MovieId) -> Result<Movie, StoreError>;

    /// Conditional write keyed on `movie.version`; mismatch or a missing row
    /// is [`StoreError::EditConflict`].
    async fn update_movie(&self, movie: &Movie) -> Result<i32, StoreError>;

    /// Unconditional; [`StoreError::NotFound`] when nothing was deleted.
    async fn delete_movie(&self, id: MovieId) -> Result<(), StoreError>;
}

/// The storage collaborators a server instance runs against.
#[derive(Clone)]
pub struct Backend {
    pub directory: Arc<dyn PrincipalDirectory>,
    pub tokens: Arc<dyn TokenRepository>,
    pub movies: Arc<dyn MovieRepository>,
}

impl Backend {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            directory: store.clone(),
            tokens: store.clone(),
            movies: store,
        }
    }

    pub fn postgres(store: Arc<PgStore>) -> Self {
        Self {
            directory: store.clone(),
            tokens: store.clone(),
            movies: store,
        }
    }
}
