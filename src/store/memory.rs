//! In-process storage backend.
//!
//! Rows live in `DashMap`s; a row's shard lock is held for the whole
//! compare-and-swap, which gives the same per-row linearizability as a
//! conditional `UPDATE`. Used for development and tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::auth::activation::{TokenRecord, TokenScope};
use crate::auth::principal::{NewPrincipal, PermissionSet, PrincipalId, PrincipalRecord};
use crate::store::movie::{Movie, MovieId, NewMovie};
use crate::store::{MovieRepository, PrincipalDirectory, StoreError, TokenRepository};

#[derive(Debug)]
pub struct MemoryStore {
    principals: DashMap<PrincipalId, PrincipalRecord>,
    /// Unique index on email.
    emails: DashMap<String, PrincipalId>,
    permissions: DashMap<PrincipalId, HashSet<String>>,
    tokens: Mutex<Vec<TokenRecord>>,
    movies: DashMap<MovieId, Movie>,
    next_principal_id: AtomicI64,
    next_movie_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            principals: DashMap::new(),
            emails: DashMap::new(),
            permissions: DashMap::new(),
            tokens: Mutex::new(Vec::new()),
            movies: DashMap::new(),
            next_principal_id: AtomicI64::new(1),
            next_movie_id: AtomicI64::new(1),
        }
    }

    /// Number of stored tokens, including expired ones awaiting cleanup.
    pub fn token_count(&self) -> usize {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrincipalDirectory for MemoryStore {
    async fn insert_principal(&self, principal: NewPrincipal) -> Result<PrincipalRecord, StoreError> {
        match self.emails.entry(principal.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateEmail),
            Entry::Vacant(slot) => {
                let record = PrincipalRecord {
                    id: self.next_principal_id.fetch_add(1, Ordering::Relaxed),
                    created_at: Utc::now(),
                    name: principal.name,
                    email: principal.email,
                    password_hash: principal.password_hash,
                    activated: principal.activated,
                    version: 1,
                };
                self.principals.insert(record.id, record.clone());
                slot.insert(record.id);
                Ok(record)
            }
        }
    }

    async fn principal_by_id(&self, id: PrincipalId) -> Result<PrincipalRecord, StoreError> {
        self.principals
            .get(&id)
            .map(|row| row.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn principal_by_email(&self, email: &str) -> Result<PrincipalRecord, StoreError> {
        let id = *self.emails.get(email).ok_or(StoreError::NotFound)?.value();
        self.principal_by_id(id).await
    }

    async fn update_principal(&self, principal: &PrincipalRecord) -> Result<i32, StoreError> {
        let mut row = self
            .principals
            .get_mut(&principal.id)
            .ok_or(StoreError::EditConflict)?;
        if row.version != principal.version {
            return Err(StoreError::EditConflict);
        }
        row.name = principal.name.clone();
        row.password_hash = principal.password_hash.clone();
        row.activated = principal.activated;
        row.version += 1;
        Ok(row.version)
    }

    async fn permissions_for(&self, id: PrincipalId) -> Result<PermissionSet, StoreError> {
        Ok(self
            .permissions
            .get(&id)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn grant_permissions(&self, id: PrincipalId, codes: &[&str]) -> Result<(), StoreError> {
        if !self.principals.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        self.permissions
            .entry(id)
            .or_default()
            .extend(codes.iter().map(|code| code.to_string()));
        Ok(())
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn insert_token(&self, record: &TokenRecord) -> Result<(), StoreError> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    async fn principal_for_token(
        &self,
        scope: TokenScope,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<PrincipalRecord, StoreError> {
        let owner = {
            let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
            tokens
                .iter()
                .find(|token| token.matches(scope, hash, now))
                .map(|token| token.principal_id)
        };
        let owner = owner.ok_or(StoreError::NotFound)?;
        self.principal_by_id(owner).await
    }

    async fn delete_tokens_for(&self, scope: TokenScope, principal_id: PrincipalId) -> Result<(), StoreError> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|token| !(token.scope == scope && token.principal_id == principal_id));
        Ok(())
    }

    async fn activate_with_token(
        &self,
        scope: TokenScope,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<PrincipalRecord, StoreError> {
        // Lock order: tokens, then the principal row.
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let owner = tokens
            .iter()
            .find(|token| token.matches(scope, hash, now))
            .map(|token| token.principal_id)
            .ok_or(StoreError::NotFound)?;

        let activated = {
            let mut row = self.principals.get_mut(&owner).ok_or(StoreError::NotFound)?;
            row.activated = true;
            row.version += 1;
            row.value().clone()
        };
        tokens.retain(|token| !(token.scope == scope && token.principal_id == owner));
        Ok(activated)
    }
}

#[async_trait]
impl MovieRepository for MemoryStore {
    async fn insert_movie(&self, movie: NewMovie) -> Result<Movie, StoreError> {
        let record = Movie {
            id: self.next_movie_id.fetch_add(1, Ordering::Relaxed),
            created_at: Utc::now(),
            title: movie.title,
            year: movie.year,
            runtime: movie.runtime,
            genres: movie.genres,
            version: 1,
        };
        self.movies.insert(record.id, record.clone());
        Ok(record)
    }

    async fn movie_by_id(&self, id: MovieId) -> Result<Movie, StoreError> {
        self.movies
            .get(&id)
            .map(|row| row.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn update_movie(&self, movie: &Movie) -> Result<i32, StoreError> {
        let mut row = self.movies.get_mut(&movie.id).ok_or(StoreError::EditConflict)?;
        if row.version != movie.version {
            return Err(StoreError::EditConflict);
        }
        row.title = movie.title.clone();
        row.year = movie.year;
        row.runtime = movie.runtime;
        row.genres = movie.genres.clone();
        row.version += 1;
        Ok(row.version)
    }

    async fn delete_movie(&self, id: MovieId) -> Result<(), StoreError> {
        self.movies.remove(&id).map(|_| ()).ok_or(StoreError::NotFound)
    }
}
