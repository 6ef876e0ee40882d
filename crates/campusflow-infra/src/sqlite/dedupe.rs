//! SQLite dedupe ledger implementation.
//!
//! `reserve` is one atomic statement: an insert that, on a logical-key
//! conflict, takes over the row only when the existing reservation has
//! expired. `rows_affected` decides the outcome -- there is no separate
//! check-then-insert window, so the uniqueness index is the sole arbiter
//! even across engine instances.

use campusflow_core::repository::dedupe::DedupeRepository;
use campusflow_types::error::RepositoryError;
use campusflow_types::trigger::NodeDedupeRecord;

use super::pool::DatabasePool;
use super::format_datetime;

/// SQLite-backed implementation of `DedupeRepository`.
pub struct SqliteDedupeRepository {
    pool: DatabasePool,
}

impl SqliteDedupeRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl DedupeRepository for SqliteDedupeRepository {
    async fn reserve(&self, record: &NodeDedupeRecord) -> Result<bool, RepositoryError> {
        // Optional key components are stored as '' so the uniqueness index
        // covers them (SQLite treats NULLs as distinct in unique indexes).
        let node_template_id = record
            .node_template_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        let scope = record.scope.clone().unwrap_or_default();

        let result = sqlx::query(
            r#"INSERT INTO workflow_dedupe
               (id, workflow_id, node_template_id, scope, schedule_run_id, operation_key, reserved_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(workflow_id, node_template_id, scope, operation_key) DO UPDATE SET
                 id = excluded.id,
                 schedule_run_id = excluded.schedule_run_id,
                 reserved_at = excluded.reserved_at,
                 expires_at = excluded.expires_at
               WHERE workflow_dedupe.expires_at IS NOT NULL
                 AND workflow_dedupe.expires_at <= excluded.reserved_at"#,
        )
        .bind(record.id.to_string())
        .bind(record.workflow_id.to_string())
        .bind(&node_template_id)
        .bind(&scope)
        .bind(record.schedule_run_id.map(|id| id.to_string()))
        .bind(&record.operation_key)
        .bind(format_datetime(&record.reserved_at))
        .bind(record.expires_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
