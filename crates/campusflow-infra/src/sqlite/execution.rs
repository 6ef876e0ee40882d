//! SQLite execution repository implementation.
//!
//! Executions and their append-only node logs. Status strings match the
//! serde snake_case renames of the domain enums; timestamps are RFC 3339
//! text.

use campusflow_core::repository::execution::ExecutionRepository;
use campusflow_types::error::RepositoryError;
use campusflow_types::workflow::{
    ExecutionStatus, NodeRunStatus, WorkflowExecution, WorkflowExecutionLog,
};
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{
    enum_from_str, enum_to_str, format_datetime, parse_datetime, parse_json, parse_opt_datetime,
    parse_opt_json, parse_opt_uuid, parse_uuid,
};

/// SQLite-backed implementation of `ExecutionRepository`.
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    execution_id: String,
    workflow_id: String,
    schedule_id: Option<String>,
    schedule_run_id: Option<String>,
    status: String,
    current_node_link_id: Option<String>,
    input_data: String,
    output_data: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            workflow_id: row.try_get("workflow_id")?,
            schedule_id: row.try_get("schedule_id")?,
            schedule_run_id: row.try_get("schedule_run_id")?,
            status: row.try_get("status")?,
            current_node_link_id: row.try_get("current_node_link_id")?,
            input_data: row.try_get("input_data")?,
            output_data: row.try_get("output_data")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_execution(self) -> Result<WorkflowExecution, RepositoryError> {
        Ok(WorkflowExecution {
            id: parse_uuid(&self.id)?,
            execution_id: self.execution_id,
            workflow_id: parse_uuid(&self.workflow_id)?,
            schedule_id: parse_opt_uuid(self.schedule_id.as_deref())?,
            schedule_run_id: parse_opt_uuid(self.schedule_run_id.as_deref())?,
            status: enum_from_str(&self.status)?,
            current_node_link_id: parse_opt_uuid(self.current_node_link_id.as_deref())?,
            input_data: parse_json(&self.input_data)?,
            output_data: parse_opt_json(self.output_data.as_deref())?,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: parse_opt_datetime(self.completed_at.as_deref())?,
        })
    }
}

struct LogRow {
    id: String,
    execution_id: String,
    node_template_id: String,
    node_name: String,
    node_type: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    execution_time_ms: Option<i64>,
    details: Option<String>,
    error_message: Option<String>,
    error_type: Option<String>,
}

impl LogRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            node_template_id: row.try_get("node_template_id")?,
            node_name: row.try_get("node_name")?,
            node_type: row.try_get("node_type")?,
            status: row.try_get("status")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            execution_time_ms: row.try_get("execution_time_ms")?,
            details: row.try_get("details")?,
            error_message: row.try_get("error_message")?,
            error_type: row.try_get("error_type")?,
        })
    }

    fn into_log(self) -> Result<WorkflowExecutionLog, RepositoryError> {
        Ok(WorkflowExecutionLog {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            node_template_id: parse_uuid(&self.node_template_id)?,
            node_name: self.node_name,
            node_type: self.node_type,
            status: enum_from_str(&self.status)?,
            started_at: parse_datetime(&self.started_at)?,
            completed_at: parse_opt_datetime(self.completed_at.as_deref())?,
            execution_time_ms: self.execution_time_ms,
            details: parse_opt_json(self.details.as_deref())?,
            error_message: self.error_message,
            error_type: self.error_type,
        })
    }
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<(), RepositoryError> {
        let input_data = serde_json::to_string(&execution.input_data)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let output_data = execution
            .output_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, execution_id, workflow_id, schedule_id, schedule_run_id, status,
                current_node_link_id, input_data, output_data, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(&execution.execution_id)
        .bind(execution.workflow_id.to_string())
        .bind(execution.schedule_id.map(|id| id.to_string()))
        .bind(execution.schedule_run_id.map(|id| id.to_string()))
        .bind(enum_to_str(&execution.status)?)
        .bind(execution.current_node_link_id.map(|id| id.to_string()))
        .bind(&input_data)
        .bind(&output_data)
        .bind(format_datetime(&execution.started_at))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_execution(
        &self,
        id: &Uuid,
        status: ExecutionStatus,
        current_node_link_id: Option<&Uuid>,
        output_data: Option<&Value>,
    ) -> Result<(), RepositoryError> {
        let completed_at = status.is_terminal().then(|| format_datetime(&Utc::now()));
        let output = output_data
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let result = sqlx::query(
            r#"UPDATE workflow_executions SET
                 status = ?,
                 current_node_link_id = COALESCE(?, current_node_link_id),
                 output_data = COALESCE(?, output_data),
                 completed_at = COALESCE(completed_at, ?)
               WHERE id = ?"#,
        )
        .bind(enum_to_str(&status)?)
        .bind(current_node_link_id.map(|id| id.to_string()))
        .bind(&output)
        .bind(&completed_at)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn get_execution(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn get_execution_by_handle(
        &self,
        execution_id: &str,
    ) -> Result<Option<WorkflowExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn create_log(&self, log: &WorkflowExecutionLog) -> Result<(), RepositoryError> {
        let details = log
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_execution_logs
               (id, execution_id, node_template_id, node_name, node_type, status,
                started_at, completed_at, execution_time_ms, details, error_message, error_type)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(log.id.to_string())
        .bind(log.execution_id.to_string())
        .bind(log.node_template_id.to_string())
        .bind(&log.node_name)
        .bind(&log.node_type)
        .bind(enum_to_str(&log.status)?)
        .bind(format_datetime(&log.started_at))
        .bind(log.completed_at.as_ref().map(format_datetime))
        .bind(log.execution_time_ms)
        .bind(&details)
        .bind(&log.error_message)
        .bind(&log.error_type)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn complete_log(
        &self,
        log_id: &Uuid,
        status: NodeRunStatus,
        execution_time_ms: i64,
        details: Option<&Value>,
        error_message: Option<&str>,
        error_type: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let details = details
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // Completed logs are append-only: the guard keeps a second
        // completion from rewriting history.
        let result = sqlx::query(
            r#"UPDATE workflow_execution_logs SET
                 status = ?,
                 execution_time_ms = ?,
                 details = ?,
                 error_message = ?,
                 error_type = ?,
                 completed_at = ?
               WHERE id = ? AND completed_at IS NULL"#,
        )
        .bind(enum_to_str(&status)?)
        .bind(execution_time_ms)
        .bind(&details)
        .bind(error_message)
        .bind(error_type)
        .bind(format_datetime(&Utc::now()))
        .bind(log_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn list_logs(
        &self,
        execution_id: &Uuid,
    ) -> Result<Vec<WorkflowExecutionLog>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_execution_logs WHERE execution_id = ? ORDER BY started_at ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = LogRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            logs.push(r.into_log()?);
        }
        Ok(logs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_execution() -> WorkflowExecution {
        let pk = Uuid::now_v7();
        WorkflowExecution {
            id: pk,
            execution_id: format!("wx-{}", pk.simple()),
            workflow_id: Uuid::now_v7(),
            schedule_id: None,
            schedule_run_id: None,
            status: ExecutionStatus::Running,
            current_node_link_id: Some(Uuid::now_v7()),
            input_data: json!({"instituteId": "i-1"}),
            output_data: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn sample_log(execution_id: Uuid) -> WorkflowExecutionLog {
        WorkflowExecutionLog {
            id: Uuid::now_v7(),
            execution_id,
            node_template_id: Uuid::now_v7(),
            node_name: "fetch-defaulters".to_string(),
            node_type: "http_request".to_string(),
            status: NodeRunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            execution_time_ms: None,
            details: None,
            error_message: None,
            error_type: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_execution() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.execution_id, execution.execution_id);
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.input_data["instituteId"], "i-1");
        assert!(loaded.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_get_execution_by_handle() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        let loaded = repo
            .get_execution_by_handle(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, execution.id);
    }

    #[tokio::test]
    async fn test_duplicate_handle_rejected() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        let mut duplicate = sample_execution();
        duplicate.execution_id = execution.execution_id.clone();
        assert!(repo.create_execution(&duplicate).await.is_err());
    }

    #[tokio::test]
    async fn test_update_execution_terminal_stamps_completed_at() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        let output = json!({"node_outputs": {"fetch": {"statusCode": 200}}});
        repo.update_execution(&execution.id, ExecutionStatus::Completed, None, Some(&output))
            .await
            .unwrap();

        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert!(loaded.completed_at.is_some());
        assert_eq!(
            loaded.output_data.unwrap()["node_outputs"]["fetch"]["statusCode"],
            200
        );
        // The current node pointer survives a None update.
        assert_eq!(loaded.current_node_link_id, execution.current_node_link_id);
    }

    #[tokio::test]
    async fn test_update_execution_waiting_not_terminal() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        repo.update_execution(&execution.id, ExecutionStatus::Waiting, None, None)
            .await
            .unwrap();

        let loaded = repo.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Waiting);
        assert!(loaded.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_execution() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let err = repo
            .update_execution(&Uuid::now_v7(), ExecutionStatus::Failed, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_log_lifecycle() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        let log = sample_log(execution.id);
        repo.create_log(&log).await.unwrap();

        let details = json!({"statusCode": 200, "body": {"count": 3}});
        repo.complete_log(&log.id, NodeRunStatus::Success, 142, Some(&details), None, None)
            .await
            .unwrap();

        let logs = repo.list_logs(&execution.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, NodeRunStatus::Success);
        assert_eq!(logs[0].execution_time_ms, Some(142));
        assert_eq!(logs[0].details.as_ref().unwrap()["statusCode"], 200);
        assert!(logs[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_completed_log_never_updated_again() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        let log = sample_log(execution.id);
        repo.create_log(&log).await.unwrap();
        repo.complete_log(&log.id, NodeRunStatus::Success, 10, None, None, None)
            .await
            .unwrap();

        // A second completion attempt must not rewrite the record.
        let err = repo
            .complete_log(
                &log.id,
                NodeRunStatus::Failure,
                99,
                None,
                Some("late error"),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));

        let logs = repo.list_logs(&execution.id).await.unwrap();
        assert_eq!(logs[0].status, NodeRunStatus::Success);
        assert_eq!(logs[0].execution_time_ms, Some(10));
    }

    #[tokio::test]
    async fn test_failure_log_fields() {
        let repo = SqliteExecutionRepository::new(test_pool().await);
        let execution = sample_execution();
        repo.create_execution(&execution).await.unwrap();

        let log = sample_log(execution.id);
        repo.create_log(&log).await.unwrap();
        repo.complete_log(
            &log.id,
            NodeRunStatus::Failure,
            55,
            Some(&json!({"error": "HTTP 404"})),
            Some("HTTP 404"),
            Some("ACTION"),
        )
        .await
        .unwrap();

        let logs = repo.list_logs(&execution.id).await.unwrap();
        assert_eq!(logs[0].status, NodeRunStatus::Failure);
        assert_eq!(logs[0].error_message.as_deref(), Some("HTTP 404"));
        assert_eq!(logs[0].error_type.as_deref(), Some("ACTION"));
    }
}
