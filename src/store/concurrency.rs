//! Optimistic concurrency control.
//!
//! # Responsibilities
//! - Require every mutation of a versioned entity to present the version it last saw
//! - Delegate the final check to the backend's conditional write
//!
//! # Design Decisions
//! - No in-process lock: two writers holding the same stale version race at
//!   the store, exactly one wins, the other gets `EditConflict`
//! - A row deleted between read and write is also `EditConflict`
//! - Retrying is the caller's decision

use async_trait::async_trait;

use crate::auth::principal::PrincipalRecord;
use crate::store::movie::Movie;
use crate::store::{MovieRepository, PrincipalDirectory, StoreError};

/// An entity carrying an optimistic-lock version.
pub trait Versioned: Send + Sync {
    type Id: Copy + Send + Sync;

    fn id(&self) -> Self::Id;
    fn version(&self) -> i32;
    fn set_version(&mut self, version: i32);
}

/// Read and compare-and-swap access to one kind of versioned entity.
#[async_trait]
pub trait VersionedStore<T: Versioned>: Send + Sync {
    async fn fetch(&self, id: T::Id) -> Result<T, StoreError>;

    /// Write `entity` if the stored version still equals `entity.version()`;
    /// returns the new version.
    async fn compare_and_swap(&self, entity: &T) -> Result<i32, StoreError>;
}

#[async_trait]
impl<R: MovieRepository + ?Sized> VersionedStore<Movie> for R {
    async fn fetch(&self, id: i64) -> Result<Movie, StoreError> {
        self.movie_by_id(id).await
    }

    async fn compare_and_swap(&self, entity: &Movie) -> Result<i32, StoreError> {
        self.update_movie(entity).await
    }
}

#[async_trait]
impl<R: PrincipalDirectory + ?Sized> VersionedStore<PrincipalRecord> for R {
    async fn fetch(&self, id: i64) -> Result<PrincipalRecord, StoreError> {
        self.principal_by_id(id).await
    }

    async fn compare_and_swap(&self, entity: &PrincipalRecord) -> Result<i32, StoreError> {
        self.update_principal(entity).await
    }
}

/// Applies mutations to versioned entities on behalf of callers that last
/// observed a specific version.
pub struct ConcurrencyGuard<'s, S: ?Sized> {
    store: &'s S,
}

impl<'s, S: ?Sized> ConcurrencyGuard<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Mutate entity `id` if it is still at `expected_version`.
    ///
    /// On success the returned entity carries the new version
    /// (`expected_version + 1`). A missing entity is `NotFound`; a version
    /// mismatch, seen either here or by the store, is `EditConflict`.
    pub async fn apply<T, F>(&self, id: T::Id, expected_version: i32, mutate: F) -> Result<T, StoreError>
    where
        T: Versioned,
        S: VersionedStore<T>,
        F: FnOnce(&mut T) + Send,
    {
        let mut entity = self.store.fetch(id).await?;
        if entity.version() != expected_version {
            return Err(StoreError::EditConflict);
        }

        mutate(&mut entity);
        // The mutation must not move the lock anchor.
        entity.set_version(expected_version);

        let version = self.store.compare_and_swap(&entity).await?;
        entity.set_version(version);
        Ok(entity)
    }
}
