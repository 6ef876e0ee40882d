//! Event trigger bindings and the dedupe ledger row.
//!
//! A `WorkflowTrigger` binds a named application event (scoped to an
//! institute) to a workflow, together with the recipe for deriving an
//! idempotency key from the event context. `NodeDedupeRecord` is the
//! physical ledger the dedupe guard inserts into; the uniqueness constraint
//! on its logical key is what makes `reserve` exactly-once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::DefinitionStatus;

// ---------------------------------------------------------------------------
// Idempotency settings
// ---------------------------------------------------------------------------

/// How a trigger's idempotency key is derived from the event context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStrategy {
    /// Fold the values of `context_fields` into the key; two events with the
    /// same field values are the same logical occurrence.
    ContextBased,
    /// Key on (institute, event name) alone: at most one execution per
    /// trigger per TTL window.
    TriggerScoped,
}

/// Idempotency-generation setting stored on a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencySetting {
    pub strategy: IdempotencyStrategy,
    /// Event context fields folded into the key (ContextBased only).
    #[serde(default)]
    pub context_fields: Vec<String>,
    /// Reservation lifetime. `None` means the key never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

/// Binds an application event to a workflow for one institute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    pub id: Uuid,
    pub institute_id: Uuid,
    /// Application event name (e.g. "student.admitted").
    pub event_name: String,
    pub workflow_id: Uuid,
    pub status: DefinitionStatus,
    pub idempotency: IdempotencySetting,
}

// ---------------------------------------------------------------------------
// Dedupe ledger
// ---------------------------------------------------------------------------

/// One reservation in the dedupe ledger.
///
/// The logical key is `(workflow_id, node_template_id, scope, operation_key)`
/// and carries a database uniqueness constraint; a successful insert means
/// "first and only execution".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDedupeRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Set for node-level reservations; absent for trigger-level ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_template_id: Option<Uuid>,
    /// Optional extra partition of the key space (e.g. a student id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// The schedule run that performed the reservation, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_run_id: Option<Uuid>,
    pub operation_key: String,
    pub reserved_at: DateTime<Utc>,
    /// After this instant the reservation may be taken again. `None` means
    /// the reservation is permanent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_strategy_serde() {
        let json = serde_json::to_string(&IdempotencyStrategy::ContextBased).unwrap();
        assert_eq!(json, "\"context_based\"");
        let parsed: IdempotencyStrategy =
            serde_json::from_str("\"trigger_scoped\"").unwrap();
        assert_eq!(parsed, IdempotencyStrategy::TriggerScoped);
    }

    #[test]
    fn test_idempotency_setting_defaults() {
        let setting: IdempotencySetting =
            serde_json::from_str(r#"{"strategy": "context_based"}"#).unwrap();
        assert!(setting.context_fields.is_empty());
        assert!(setting.ttl_secs.is_none());
    }

    #[test]
    fn test_trigger_json_roundtrip() {
        let trigger = WorkflowTrigger {
            id: Uuid::now_v7(),
            institute_id: Uuid::now_v7(),
            event_name: "student.admitted".to_string(),
            workflow_id: Uuid::now_v7(),
            status: DefinitionStatus::Active,
            idempotency: IdempotencySetting {
                strategy: IdempotencyStrategy::ContextBased,
                context_fields: vec!["studentId".to_string(), "batchId".to_string()],
                ttl_secs: Some(3600),
            },
        };
        let json_str = serde_json::to_string(&trigger).unwrap();
        let parsed: WorkflowTrigger = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.event_name, "student.admitted");
        assert_eq!(parsed.idempotency.context_fields.len(), 2);
        assert_eq!(parsed.idempotency.ttl_secs, Some(3600));
    }

    #[test]
    fn test_dedupe_record_json_roundtrip() {
        let record = NodeDedupeRecord {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            node_template_id: Some(Uuid::now_v7()),
            scope: Some("student-42".to_string()),
            schedule_run_id: None,
            operation_key: "fee-reminder:2025-08".to_string(),
            reserved_at: Utc::now(),
            expires_at: None,
        };
        let json_str = serde_json::to_string(&record).unwrap();
        let parsed: NodeDedupeRecord = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.operation_key, "fee-reminder:2025-08");
        assert_eq!(parsed.scope.as_deref(), Some("student-42"));
    }
}
