//! SQLite trigger repository implementation.

use campusflow_core::repository::trigger::TriggerRepository;
use campusflow_types::error::RepositoryError;
use campusflow_types::trigger::{IdempotencySetting, WorkflowTrigger};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{enum_from_str, enum_to_str, parse_uuid};

/// SQLite-backed implementation of `TriggerRepository`.
pub struct SqliteTriggerRepository {
    pool: DatabasePool,
}

impl SqliteTriggerRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct TriggerRow {
    id: String,
    institute_id: String,
    event_name: String,
    workflow_id: String,
    status: String,
    idempotency: String,
}

impl TriggerRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            institute_id: row.try_get("institute_id")?,
            event_name: row.try_get("event_name")?,
            workflow_id: row.try_get("workflow_id")?,
            status: row.try_get("status")?,
            idempotency: row.try_get("idempotency")?,
        })
    }

    fn into_trigger(self) -> Result<WorkflowTrigger, RepositoryError> {
        let idempotency: IdempotencySetting = serde_json::from_str(&self.idempotency)
            .map_err(|e| RepositoryError::Query(format!("invalid idempotency JSON: {e}")))?;

        Ok(WorkflowTrigger {
            id: parse_uuid(&self.id)?,
            institute_id: parse_uuid(&self.institute_id)?,
            event_name: self.event_name,
            workflow_id: parse_uuid(&self.workflow_id)?,
            status: enum_from_str(&self.status)?,
            idempotency,
        })
    }
}

impl TriggerRepository for SqliteTriggerRepository {
    async fn find_active(
        &self,
        institute_id: &Uuid,
        event_name: &str,
    ) -> Result<Option<WorkflowTrigger>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM workflow_triggers WHERE institute_id = ? AND event_name = ? AND status = 'active'",
        )
        .bind(institute_id.to_string())
        .bind(event_name)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = TriggerRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_trigger()?))
            }
            None => Ok(None),
        }
    }

    async fn save_trigger(&self, trigger: &WorkflowTrigger) -> Result<(), RepositoryError> {
        let idempotency = serde_json::to_string(&trigger.idempotency)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_triggers (id, institute_id, event_name, workflow_id, status, idempotency)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 workflow_id = excluded.workflow_id,
                 status = excluded.status,
                 idempotency = excluded.idempotency"#,
        )
        .bind(trigger.id.to_string())
        .bind(trigger.institute_id.to_string())
        .bind(&trigger.event_name)
        .bind(trigger.workflow_id.to_string())
        .bind(enum_to_str(&trigger.status)?)
        .bind(&idempotency)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
