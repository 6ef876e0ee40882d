//! Execution repository trait.
//!
//! Storage interface for execution records and their append-only per-node
//! logs. The engine persists every state transition through this port
//! before moving forward.

use campusflow_types::error::RepositoryError;
use campusflow_types::workflow::{
    ExecutionStatus, NodeRunStatus, WorkflowExecution, WorkflowExecutionLog,
};
use serde_json::Value;
use uuid::Uuid;

/// Repository trait for execution persistence.
pub trait ExecutionRepository: Send + Sync {
    /// Create a new execution record.
    fn create_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update an execution's status, current node pointer, and output
    /// snapshot. `None` leaves the existing column value unchanged.
    /// Terminal statuses stamp `completed_at`; once set it is never
    /// cleared.
    fn update_execution(
        &self,
        id: &Uuid,
        status: ExecutionStatus,
        current_node_link_id: Option<&Uuid>,
        output_data: Option<&Value>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution by its primary key.
    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// Get an execution by its externally addressable handle.
    fn get_execution_by_handle(
        &self,
        execution_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// Append a node execution log entry.
    fn create_log(
        &self,
        log: &WorkflowExecutionLog,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Complete a node log: final status, measured duration, strategy result
    /// and error fields. Stamps `completed_at`. A completed log is never
    /// updated again.
    fn complete_log(
        &self,
        log_id: &Uuid,
        status: NodeRunStatus,
        execution_time_ms: i64,
        details: Option<&Value>,
        error_message: Option<&str>,
        error_type: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all node logs for an execution, ordered by `started_at` ASC.
    fn list_logs(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecutionLog>, RepositoryError>> + Send;
}
