use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::error;

use crate::errors::AppError;

/// Minimal object-store contract: named text blobs with prefix listing.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<String>, AppError>;

    /// Names of all blobs starting with `prefix`, in lexical order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, AppError>;

    /// Creates or overwrites the blob.
    async fn put(&self, name: &str, content: String) -> Result<(), AppError>;

    /// Returns whether a blob existed and was removed.
    async fn delete(&self, name: &str) -> Result<bool, AppError>;
}

/// Blobs stored in the `topic_blobs` table.
#[derive(Clone)]
pub struct PgBlobStore {
    pool: PgPool,
}

impl PgBlobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlobStore for PgBlobStore {
    async fn get(&self, name: &str) -> Result<Option<String>, AppError> {
        sqlx::query_scalar::<_, String>("SELECT content FROM topic_blobs WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to read blob {name}: {e}");
                AppError::db_query(format!("Failed to read blob {name}"), e)
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        sqlx::query_scalar::<_, String>(
            "SELECT name FROM topic_blobs WHERE starts_with(name, $1) ORDER BY name",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list blobs under {prefix}: {e}");
            AppError::db_query(format!("Failed to list blobs under {prefix}"), e)
        })
    }

    async fn put(&self, name: &str, content: String) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO topic_blobs (name, content, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE
             SET content = EXCLUDED.content, updated_at = EXCLUDED.updated_at",
        )
        .bind(name)
        .bind(content)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to write blob {name}: {e}");
            AppError::db_query(format!("Failed to write blob {name}"), e)
        })?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM topic_blobs WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete blob {name}: {e}");
                AppError::db_query(format!("Failed to delete blob {name}"), e)
            })?;
        Ok(result.rows_affected() > 0)
    }
}

/// Process-local blob store, used when no database is configured.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, name: &str) -> Result<Option<String>, AppError> {
        Ok(self.blobs.read().await.get(name).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, AppError> {
        let blobs = self.blobs.read().await;
        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn put(&self, name: &str, content: String) -> Result<(), AppError> {
        self.blobs.write().await.insert(name.to_string(), content);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, AppError> {
        Ok(self.blobs.write().await.remove(name).is_some())
    }
}
