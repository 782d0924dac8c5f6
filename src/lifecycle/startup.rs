//! Startup orchestration.
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - No DSN configured means the in-memory store (development only)

use std::sync::Arc;

use crate::config::GateConfig;
use crate::store::{Backend, MemoryStore, PgStore, StoreError};

/// Connect the configured backing store, running migrations if asked.
pub async fn build_backend(config: &GateConfig) -> Result<Backend, StoreError> {
    let Some(dsn) = config.database.dsn.as_deref() else {
        tracing::warn!("No database DSN configured; using the in-memory store");
        return Ok(Backend::memory(Arc::new(MemoryStore::new())));
    };

    let store = PgStore::connect(dsn, config.database.max_connections, config.timeouts.store()).await?;
    if config.database.migrate {
        store.migrate().await?;
        tracing::info!("Database schema is up to date");
    }
    tracing::info!(max_connections = config.database.max_connections, "Connected to PostgreSQL");
    Ok(Backend::postgres(Arc::new(store)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::NewPrincipal;

    #[tokio::test]
    async fn test_no_dsn_builds_memory_backend() {
        let backend = build_backend(&GateConfig::default()).await.unwrap();
        let record = backend
            .directory
            .insert_principal(NewPrincipal {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                password_hash: "$2b$04$hash".into(),
                activated: false,
            })
            .await
            .unwrap();
        assert_eq!(backend.directory.principal_by_id(record.id).await.unwrap().email, "ada@example.com");
    }
}
