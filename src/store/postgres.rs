//! PostgreSQL storage backend.
//!
//! Conditional writes are `UPDATE ... WHERE id = $n AND version = $m
//! RETURNING version`; zero rows back means someone else won. Activation runs
//! in one transaction with the owning row locked `FOR UPDATE`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::Instrument;

use crate::auth::activation::{TokenRecord, TokenScope};
use crate::auth::principal::{NewPrincipal, PermissionSet, PrincipalId, PrincipalRecord};
use crate::store::movie::{Movie, MovieId, NewMovie};
use crate::store::{with_deadline, MovieRepository, PrincipalDirectory, StoreError, TokenRepository};

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");

const PRINCIPAL_COLUMNS: &str = "users.id, users.created_at, users.name, users.email, \
     users.password_hash, users.activated, users.version";

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    deadline: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }

    pub async fn connect(dsn: &str, max_connections: u32, deadline: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(deadline)
            .connect(dsn)
            .await?;
        Ok(Self::new(pool, deadline))
    }

    /// Create tables and seed the permission catalog. Idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

fn query_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::debug_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_violation(err: &sqlx::Error, code: &str) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|found| found == code)
}

fn principal_from_row(row: &PgRow) -> Result<PrincipalRecord, StoreError> {
    Ok(PrincipalRecord {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        activated: row.try_get("activated")?,
        version: row.try_get("version")?,
    })
}

fn movie_from_row(row: &PgRow) -> Result<Movie, StoreError> {
    Ok(Movie {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        title: row.try_get("title")?,
        year: row.try_get("year")?,
        runtime: row.try_get("runtime")?,
        genres: row.try_get("genres")?,
        version: row.try_get("version")?,
    })
}

#[async_trait]
impl PrincipalDirectory for PgStore {
    async fn insert_principal(&self, principal: NewPrincipal) -> Result<PrincipalRecord, StoreError> {
        let query = "INSERT INTO users (name, email, password_hash, activated) \
                     VALUES ($1, $2, $3, $4) RETURNING id, created_at, version";
        with_deadline(self.deadline, async {
            let row = sqlx::query(query)
                .bind(&principal.name)
                .bind(&principal.email)
                .bind(&principal.password_hash)
                .bind(principal.activated)
                .fetch_one(&self.pool)
                .instrument(query_span("INSERT", query))
                .await
                .map_err(|err| {
                    if is_violation(&err, UNIQUE_VIOLATION) {
                        StoreError::DuplicateEmail
                    } else {
                        StoreError::Database(err)
                    }
                })?;
            Ok(PrincipalRecord {
                id: row.try_get("id")?,
                created_at: row.try_get("created_at")?,
                name: principal.name,
                email: principal.email,
                password_hash: principal.password_hash,
                activated: principal.activated,
                version: row.try_get("version")?,
            })
        })
        .await
    }

    async fn principal_by_id(&self, id: PrincipalId) -> Result<PrincipalRecord, StoreError> {
        let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE users.id = $1");
        with_deadline(self.deadline, async {
            let row = sqlx::query(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .instrument(query_span("SELECT", &query))
                .await?;
            principal_from_row(&row.ok_or(StoreError::NotFound)?)
        })
        .await
    }

    async fn principal_by_email(&self, email: &str) -> Result<PrincipalRecord, StoreError> {
        let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE users.email = $1");
        with_deadline(self.deadline, async {
            let row = sqlx::query(&query)
                .bind(email)
                .fetch_optional(&self.pool)
                .instrument(query_span("SELECT", &query))
                .await?;
            principal_from_row(&row.ok_or(StoreError::NotFound)?)
        })
        .await
    }

    async fn update_principal(&self, principal: &PrincipalRecord) -> Result<i32, StoreError> {
        let query = "UPDATE users \
                     SET name = $1, password_hash = $2, activated = $3, version = version + 1 \
                     WHERE id = $4 AND version = $5 \
                     RETURNING version";
        with_deadline(self.deadline, async {
            let version: Option<i32> = sqlx::query_scalar(query)
                .bind(&principal.name)
                .bind(&principal.password_hash)
                .bind(principal.activated)
                .bind(principal.id)
                .bind(principal.version)
                .fetch_optional(&self.pool)
                .instrument(query_span("UPDATE", query))
                .await?;
            version.ok_or(StoreError::EditConflict)
        })
        .await
    }

    async fn permissions_for(&self, id: PrincipalId) -> Result<PermissionSet, StoreError> {
        let query = "SELECT permissions.code FROM permissions \
                     INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id \
                     WHERE users_permissions.user_id = $1";
        with_deadline(self.deadline, async {
            let codes: Vec<String> = sqlx::query_scalar(query)
                .bind(id)
                .fetch_all(&self.pool)
                .instrument(query_span("SELECT", query))
                .await?;
            Ok(codes.into_iter().collect())
        })
        .await
    }

    async fn grant_permissions(&self, id: PrincipalId, codes: &[&str]) -> Result<(), StoreError> {
        let query = "INSERT INTO users_permissions (user_id, permission_id) \
                     SELECT $1, permissions.id FROM permissions WHERE permissions.code = ANY($2) \
                     ON CONFLICT DO NOTHING";
        let codes: Vec<String> = codes.iter().map(|code| code.to_string()).collect();
        with_deadline(self.deadline, async {
            sqlx::query(query)
                .bind(id)
                .bind(&codes)
                .execute(&self.pool)
                .instrument(query_span("INSERT", query))
                .await
                .map_err(|err| {
                    if is_violation(&err, FOREIGN_KEY_VIOLATION) {
                        StoreError::NotFound
                    } else {
                        StoreError::Database(err)
                    }
                })?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn insert_token(&self, record: &TokenRecord) -> Result<(), StoreError> {
        let query = "INSERT INTO tokens (hash, user_id, expiry, scope) VALUES ($1, $2, $3, $4)";
        with_deadline(self.deadline, async {
            sqlx::query(query)
                .bind(&record.hash)
                .bind(record.principal_id)
                .bind(record.expiry)
                .bind(record.scope.as_str())
                .execute(&self.pool)
                .instrument(query_span("INSERT", query))
                .await?;
            Ok(())
        })
        .await
    }

    async fn principal_for_token(
        &self,
        scope: TokenScope,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<PrincipalRecord, StoreError> {
        let query = format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM users \
             INNER JOIN tokens ON users.id = tokens.user_id \
             WHERE tokens.hash = $1 AND tokens.scope = $2 AND tokens.expiry > $3"
        );
        with_deadline(self.deadline, async {
            let row = sqlx::query(&query)
                .bind(hash)
                .bind(scope.as_str())
                .bind(now)
                .fetch_optional(&self.pool)
                .instrument(query_span("SELECT", &query))
                .await?;
            principal_from_row(&row.ok_or(StoreError::NotFound)?)
        })
        .await
    }

    async fn delete_tokens_for(&self, scope: TokenScope, principal_id: PrincipalId) -> Result<(), StoreError> {
        let query = "DELETE FROM tokens WHERE scope = $1 AND user_id = $2";
        with_deadline(self.deadline, async {
            sqlx::query(query)
                .bind(scope.as_str())
                .bind(principal_id)
                .execute(&self.pool)
                .instrument(query_span("DELETE", query))
                .await?;
            Ok(())
        })
        .await
    }

    async fn activate_with_token(
        &self,
        scope: TokenScope,
        hash: &[u8],
        now: DateTime<Utc>,
    ) -> Result<PrincipalRecord, StoreError> {
        let lookup = format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM users \
             INNER JOIN tokens ON users.id = tokens.user_id \
             WHERE tokens.hash = $1 AND tokens.scope = $2 AND tokens.expiry > $3 \
             FOR UPDATE OF users"
        );
        let activate = "UPDATE users SET activated = true, version = version + 1 \
                        WHERE id = $1 AND version = $2 \
                        RETURNING version";
        let consume = "DELETE FROM tokens WHERE scope = $1 AND user_id = $2";

        with_deadline(self.deadline, async {
            // Dropping the transaction without commit rolls it back.
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query(&lookup)
                .bind(hash)
                .bind(scope.as_str())
                .bind(now)
                .fetch_optional(&mut *tx)
                .instrument(query_span("SELECT", &lookup))
                .await?;
            let mut principal = principal_from_row(&row.ok_or(StoreError::NotFound)?)?;

            let version: Option<i32> = sqlx::query_scalar(activate)
                .bind(principal.id)
                .bind(principal.version)
                .fetch_optional(&mut *tx)
                .instrument(query_span("UPDATE", activate))
                .await?;
            principal.version = version.ok_or(StoreError::EditConflict)?;
            principal.activated = true;

            sqlx::query(consume)
                .bind(scope.as_str())
                .bind(principal.id)
                .execute(&mut *tx)
                .instrument(query_span("DELETE", consume))
                .await?;

            tx.commit().await?;
            Ok(principal)
        })
        .await
    }
}

#[async_trait]
impl MovieRepository for PgStore {
    async fn insert_movie(&self, movie: NewMovie) -> Result<Movie, StoreError> {
        let query = "INSERT INTO movies (title, year, runtime, genres) \
                     VALUES ($1, $2, $3, $4) RETURNING id, created_at, version";
        with_deadline(self.deadline, async {
            let row = sqlx::query(query)
                .bind(&movie.title)
                .bind(movie.year)
                .bind(movie.runtime)
                .bind(&movie.genres)
                .fetch_one(&self.pool)
                .instrument(query_span("INSERT", query))
                .await?;
            Ok(Movie {
                id: row.try_get("id")?,
                created_at: row.try_get("created_at")?,
                title: movie.title,
                year: movie.year,
                runtime: movie.runtime,
                genres: movie.genres,
                version: row.try_get("version")?,
            })
        })
        .await
    }

    async fn movie_by_id(&self, id: MovieId) -> Result<Movie, StoreError> {
        let query = "SELECT id, created_at, title, year, runtime, genres, version FROM movies WHERE id = $1";
        with_deadline(self.deadline, async {
            let row = sqlx::query(query)
                .bind(id)
                .fetch_optional(&self.pool)
                .instrument(query_span("SELECT", query))
                .await?;
            movie_from_row(&row.ok_or(StoreError::NotFound)?)
        })
        .await
    }

    async fn update_movie(&self, movie: &Movie) -> Result<i32, StoreError> {
        let query = "UPDATE movies \
                     SET title = $1, year = $2, runtime = $3, genres = $4, version = version + 1 \
                     WHERE id = $5 AND version = $6 \
                     RETURNING version";
        with_deadline(self.deadline, async {
            let version: Option<i32> = sqlx::query_scalar(query)
                .bind(&movie.title)
                .bind(movie.year)
                .bind(movie.runtime)
                .bind(&movie.genres)
                .bind(movie.id)
                .bind(movie.version)
                .fetch_optional(&self.pool)
                .instrument(query_span("UPDATE", query))
                .await?;
            version.ok_or(StoreError::EditConflict)
        })
        .await
    }

    async fn delete_movie(&self, id: MovieId) -> Result<(), StoreError> {
        let query = "DELETE FROM movies WHERE id = $1";
        with_deadline(self.deadline, async {
            let result = sqlx::query(query)
                .bind(id)
                .execute(&self.pool)
                .instrument(query_span("DELETE", query))
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }
}
