//! SQLite-backed `Checkpointer` (§4.2), grounded on the teacher's
//! `SQLiteCheckpointer`: a connection pool, embedded migrations behind the
//! `sqlite-migrations` feature, and checkpoints stored as a JSON blob keyed
//! by `(tenant_id, session_id, version)` with a unique index.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use super::{Checkpoint, Checkpointer, CheckpointerError, Result};

/// Pooled SQLite checkpoint storage. Cheap to clone (an `Arc<SqlitePool>`
/// underneath), so it can be shared across sessions.
pub struct SqliteCheckpointer {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointer").finish()
    }
}

impl SqliteCheckpointer {
    /// Connect (or create) a SQLite database at `database_url`, e.g.
    /// `sqlite://agentloom.db`. Runs embedded migrations when the
    /// `sqlite-migrations` feature is enabled (the default).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| CheckpointerError::Backend {
                message: format!("connect error: {e}"),
            })?;

        #[cfg(feature = "sqlite-migrations")]
        {
            sqlx::migrate!("./migrations/sqlite")
                .run(&pool)
                .await
                .map_err(|e| CheckpointerError::Backend {
                    message: format!("migration failure: {e}"),
                })?;
        }

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    fn row_to_checkpoint(row: SqliteRow) -> Result<Checkpoint> {
        let blob: String = row.try_get("blob").map_err(|e| CheckpointerError::Backend {
            message: format!("blob read: {e}"),
        })?;
        let created_at_str: String =
            row.try_get("created_at").map_err(|e| CheckpointerError::Backend {
                message: format!("created_at read: {e}"),
            })?;
        let mut checkpoint: Checkpoint =
            serde_json::from_str(&blob).map_err(|e| CheckpointerError::Other {
                message: format!("checkpoint decode: {e}"),
            })?;
        checkpoint.created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(checkpoint.created_at);
        Ok(checkpoint)
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    #[instrument(skip(self, checkpoint), err)]
    async fn save(&self, checkpoint: Checkpoint) -> Result<u64> {
        let blob = serde_json::to_string(&checkpoint).map_err(|e| CheckpointerError::Other {
            message: format!("checkpoint encode: {e}"),
        })?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints
                (tenant_id, session_id, version, state_tag, blob, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&checkpoint.tenant_id)
        .bind(&checkpoint.session_id)
        .bind(checkpoint.version as i64)
        .bind(format!("{:?}", checkpoint.state))
        .bind(&blob)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&*self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("insert checkpoint: {e}"),
        })?;
        Ok(checkpoint.version)
    }

    #[instrument(skip(self), err)]
    async fn load_latest(&self, tenant_id: &str, session_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            r#"
            SELECT blob, created_at FROM checkpoints
            WHERE tenant_id = ?1 AND session_id = ?2
            ORDER BY version DESC LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("select latest: {e}"),
        })?;
        row.map(Self::row_to_checkpoint).transpose()
    }

    #[instrument(skip(self), err)]
    /// Returns the latest version at or before `version` (§4.2) — an
    /// exact match isn't required, since a reader may ask for a version
    /// that was pruned or never written for this session.
    async fn load_at(
        &self,
        tenant_id: &str,
        session_id: &str,
        version: u64,
    ) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            r#"
            SELECT blob, created_at FROM checkpoints
            WHERE tenant_id = ?1 AND session_id = ?2 AND version <= ?3
            ORDER BY version DESC LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(version as i64)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("select at version: {e}"),
        })?;
        row.map(Self::row_to_checkpoint).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_versions(
        &self,
        tenant_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<u64>> {
        let rows = sqlx::query(
            r#"
            SELECT version FROM checkpoints
            WHERE tenant_id = ?1 AND session_id = ?2
            ORDER BY version DESC LIMIT ?3
            "#,
        )
        .bind(tenant_id)
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend {
            message: format!("select versions: {e}"),
        })?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<i64, _>("version") as u64)
            .collect())
    }

    #[instrument(skip(self), err)]
    async fn prune(&self, tenant_id: &str, session_id: &str, keep_last: usize) -> Result<usize> {
        let keep: Vec<i64> = self
            .list_versions(tenant_id, session_id, keep_last)
            .await?
            .into_iter()
            .map(|v| v as i64)
            .collect();
        if keep.is_empty() {
            return Ok(0);
        }
        let placeholders = keep.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "DELETE FROM checkpoints WHERE tenant_id = ? AND session_id = ? AND version NOT IN ({placeholders})"
        );
        let mut q = sqlx::query(&query).bind(tenant_id).bind(session_id);
        for v in &keep {
            q = q.bind(v);
        }
        let result = q.execute(&*self.pool).await.map_err(|e| CheckpointerError::Backend {
            message: format!("prune: {e}"),
        })?;
        Ok(result.rows_affected() as usize)
    }
}
