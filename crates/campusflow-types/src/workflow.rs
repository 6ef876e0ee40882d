//! Workflow domain types for CampusFlow.
//!
//! A workflow is a catalog entity: an ordered chain of node templates bound
//! through `WorkflowNodeMapping` rows. Executions (`WorkflowExecution`) and
//! their per-node audit records (`WorkflowExecutionLog`) track each run of a
//! workflow through the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Catalog entities
// ---------------------------------------------------------------------------

/// Lifecycle status shared by catalog entities (workflows, node templates,
/// triggers). Entities are never physically deleted; they move to `Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionStatus {
    Active,
    Inactive,
    Draft,
}

/// How a workflow is expected to be fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    /// Fired by the scheduler from a `WorkflowSchedule`.
    Scheduled,
    /// Fired on demand or by an application event trigger.
    Manual,
}

/// A reusable multi-step automation owned by an institute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// UUIDv7 assigned on creation.
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    /// Lifecycle status. Only `Active` workflows are executable.
    pub status: DefinitionStatus,
    /// Scheduled vs. manual firing.
    pub kind: WorkflowKind,
    /// Owning institute.
    pub institute_id: Uuid,
    /// Admin who created the workflow.
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reusable node definition: one step's action, described as a versioned
/// JSON configuration blob. Immutable once referenced by a mapping; drafting
/// a change bumps `config_version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub id: Uuid,
    /// Node name; also the key under which the node's output lands in the
    /// execution context.
    pub name: String,
    /// Discriminator for the action family (e.g. "http_request").
    pub node_type: String,
    /// Version of the configuration blob.
    pub config_version: u32,
    /// HTTP-shaped action configuration (see `campusflow-core::strategy`).
    pub config: Value,
    pub status: DefinitionStatus,
}

/// Per-node failure policy: whether a failed node aborts the execution or
/// lets it continue with the next node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    Abort,
    Continue,
}

/// Links a `Workflow` to a `NodeTemplate` at a position in the node chain.
///
/// `node_order` is a total order within a workflow (ties are a definition
/// error). Exactly one mapping per workflow carries `is_start_node`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNodeMapping {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub node_template_id: Uuid,
    /// Position in the chain, ascending.
    pub node_order: i32,
    pub is_start_node: bool,
    pub is_end_node: bool,
    /// Shallow JSON overrides merged over the template's base config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_config: Option<Value>,
    /// Failure policy for this node (default: abort the execution).
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Created,
    Running,
    Completed,
    Failed,
    /// A node's result instructed the runtime to pause (awaiting an external
    /// confirmation). Not terminal: `completed_at` stays unset.
    Waiting,
}

impl ExecutionStatus {
    /// Terminal statuses stamp `completed_at` and end the execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// One instance of running a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// UUIDv7 primary key.
    pub id: Uuid,
    /// Externally addressable handle, unique across all executions.
    pub execution_id: String,
    pub workflow_id: Uuid,
    /// Set when the execution was dispatched by the scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_run_id: Option<Uuid>,
    pub status: ExecutionStatus,
    /// The node mapping currently (or last) being executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_link_id: Option<Uuid>,
    /// Seed context for expression evaluation.
    pub input_data: Value,
    /// Final context snapshot, serialized on every terminal path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Status of a single node attempt within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Running,
    Success,
    Failure,
    /// The node's dedupe key was already reserved; the action did not run.
    Skipped,
}

/// One row per node attempt within an execution. Append-only: never updated
/// after completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionLog {
    pub id: Uuid,
    /// Parent execution (primary key, not the external handle).
    pub execution_id: Uuid,
    pub node_template_id: Uuid,
    /// Node name (denormalized for display).
    pub node_name: String,
    pub node_type: String,
    pub status: NodeRunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration, computed when the log is completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<i64>,
    /// Normalized strategy result map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_workflow() -> Workflow {
        Workflow {
            id: Uuid::now_v7(),
            name: "fee-reminder".to_string(),
            status: DefinitionStatus::Active,
            kind: WorkflowKind::Scheduled,
            institute_id: Uuid::now_v7(),
            created_by: Uuid::now_v7(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_workflow_json_roundtrip() {
        let wf = sample_workflow();
        let json_str = serde_json::to_string(&wf).unwrap();
        assert!(json_str.contains("\"status\":\"active\""));
        assert!(json_str.contains("\"kind\":\"scheduled\""));
        let parsed: Workflow = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.name, "fee-reminder");
        assert_eq!(parsed.status, DefinitionStatus::Active);
    }

    #[test]
    fn test_definition_status_serde() {
        for status in [
            DefinitionStatus::Active,
            DefinitionStatus::Inactive,
            DefinitionStatus::Draft,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let parsed: DefinitionStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_node_mapping_defaults() {
        // on_error and override_config are optional in stored JSON.
        let json_str = format!(
            r#"{{
                "id": "{}",
                "workflow_id": "{}",
                "node_template_id": "{}",
                "node_order": 1,
                "is_start_node": true,
                "is_end_node": false
            }}"#,
            Uuid::now_v7(),
            Uuid::now_v7(),
            Uuid::now_v7()
        );
        let mapping: WorkflowNodeMapping = serde_json::from_str(&json_str).unwrap();
        assert_eq!(mapping.on_error, ErrorPolicy::Abort);
        assert!(mapping.override_config.is_none());
    }

    #[test]
    fn test_error_policy_serde() {
        let json = serde_json::to_string(&ErrorPolicy::Continue).unwrap();
        assert_eq!(json, "\"continue\"");
        let parsed: ErrorPolicy = serde_json::from_str("\"abort\"").unwrap();
        assert_eq!(parsed, ErrorPolicy::Abort);
    }

    #[test]
    fn test_execution_status_terminal() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Waiting.is_terminal());
        assert!(!ExecutionStatus::Created.is_terminal());
    }

    #[test]
    fn test_execution_json_roundtrip() {
        let exec = WorkflowExecution {
            id: Uuid::now_v7(),
            execution_id: "exec-01938e90".to_string(),
            workflow_id: Uuid::now_v7(),
            schedule_id: None,
            schedule_run_id: None,
            status: ExecutionStatus::Running,
            current_node_link_id: Some(Uuid::now_v7()),
            input_data: json!({"instituteId": "abc"}),
            output_data: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        let json_str = serde_json::to_string(&exec).unwrap();
        let parsed: WorkflowExecution = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.execution_id, "exec-01938e90");
        assert_eq!(parsed.status, ExecutionStatus::Running);
        assert!(parsed.completed_at.is_none());
    }

    #[test]
    fn test_execution_log_json_roundtrip() {
        let log = WorkflowExecutionLog {
            id: Uuid::now_v7(),
            execution_id: Uuid::now_v7(),
            node_template_id: Uuid::now_v7(),
            node_name: "notify-parent".to_string(),
            node_type: "http_request".to_string(),
            status: NodeRunStatus::Success,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            execution_time_ms: Some(142),
            details: Some(json!({"statusCode": 200})),
            error_message: None,
            error_type: None,
        };
        let json_str = serde_json::to_string(&log).unwrap();
        let parsed: WorkflowExecutionLog = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.node_name, "notify-parent");
        assert_eq!(parsed.status, NodeRunStatus::Success);
        assert_eq!(parsed.execution_time_ms, Some(142));
    }

    #[test]
    fn test_node_template_config_blob() {
        let template = NodeTemplate {
            id: Uuid::now_v7(),
            name: "fetch-defaulters".to_string(),
            node_type: "http_request".to_string(),
            config_version: 2,
            config: json!({
                "url": "{{ services.payments }}/defaulters",
                "method": "GET",
                "requestType": "INTERNAL"
            }),
            status: DefinitionStatus::Active,
        };
        let json_str = serde_json::to_string(&template).unwrap();
        let parsed: NodeTemplate = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.config_version, 2);
        assert_eq!(parsed.config["method"], "GET");
    }
}
