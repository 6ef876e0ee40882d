//! Trigger router: application events -> workflow executions.
//!
//! On receipt of a named event the router looks up the Active trigger bound
//! to `(institute_id, event_name)`, derives an idempotency key from the
//! trigger's `IdempotencySetting`, and reserves it through the dedupe
//! guard. Only a successful reservation dispatches an execution; a repeat
//! within the TTL is a silent no-op -- expected, not exceptional.

use std::sync::Arc;

use campusflow_types::error::RepositoryError;
use campusflow_types::trigger::{IdempotencyStrategy, WorkflowTrigger};
use chrono::Duration;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::dedupe::DedupeGuard;
use crate::repository::dedupe::DedupeRepository;
use crate::repository::trigger::TriggerRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while routing an event.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("dispatch failed: {0}")]
    Dispatch(String),
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What routing an event resulted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new execution was dispatched.
    Dispatched { execution_id: Uuid },
    /// The idempotency key was already reserved; nothing ran.
    Duplicate,
    /// No active trigger is bound to this event.
    NoTrigger,
}

/// Callback dispatching a seeded execution for the bound workflow.
///
/// Returns the execution primary key.
pub type TriggerDispatchFn = Arc<
    dyn Fn(Uuid, Value) -> futures_util::future::BoxFuture<'static, Result<Uuid, String>>
        + Send
        + Sync,
>;

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive the deterministic idempotency key for one event occurrence.
///
/// `ContextBased` folds the configured context fields (in their configured
/// order, dotted paths supported) into the digest material; a missing field
/// folds as empty with a warning. `TriggerScoped` keys on the trigger
/// binding alone.
pub fn derive_idempotency_key(trigger: &WorkflowTrigger, payload: &Value) -> String {
    let material = match trigger.idempotency.strategy {
        IdempotencyStrategy::ContextBased => {
            let fields: Vec<String> = trigger
                .idempotency
                .context_fields
                .iter()
                .map(|field| {
                    let value = lookup_path(payload, field)
                        .map(value_to_key_part)
                        .unwrap_or_else(|| {
                            tracing::warn!(
                                field = field.as_str(),
                                event = trigger.event_name.as_str(),
                                "idempotency field missing from event context"
                            );
                            String::new()
                        });
                    format!("{field}={value}")
                })
                .collect();
            format!(
                "{}:{}:{}",
                trigger.institute_id,
                trigger.event_name,
                fields.join("|")
            )
        }
        IdempotencyStrategy::TriggerScoped => {
            format!("{}:{}", trigger.institute_id, trigger.event_name)
        }
    };

    let digest = Sha256::digest(material.as_bytes());
    format!("{digest:x}")
}

/// Resolve a dotted path into the payload.
fn lookup_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn value_to_key_part(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// TriggerRouter
// ---------------------------------------------------------------------------

/// Routes application events to workflow executions.
pub struct TriggerRouter<T: TriggerRepository, L: DedupeRepository> {
    repo: T,
    guard: DedupeGuard<L>,
    dispatch: TriggerDispatchFn,
}

impl<T: TriggerRepository, L: DedupeRepository> TriggerRouter<T, L> {
    pub fn new(repo: T, dedupe: L, dispatch: TriggerDispatchFn) -> Self {
        Self {
            repo,
            guard: DedupeGuard::new(dedupe),
            dispatch,
        }
    }

    /// Route one event occurrence.
    pub async fn route(
        &self,
        institute_id: Uuid,
        event_name: &str,
        payload: Value,
    ) -> Result<TriggerOutcome, TriggerError> {
        let Some(trigger) = self.repo.find_active(&institute_id, event_name).await? else {
            tracing::debug!(%institute_id, event_name, "no trigger bound to event");
            return Ok(TriggerOutcome::NoTrigger);
        };

        let key = derive_idempotency_key(&trigger, &payload);
        let ttl = trigger
            .idempotency
            .ttl_secs
            .map(|secs| Duration::seconds(secs as i64));

        let reserved = self
            .guard
            .reserve(trigger.workflow_id, None, None, None, &key, ttl)
            .await?;
        if !reserved {
            tracing::info!(
                %institute_id,
                event_name,
                workflow_id = %trigger.workflow_id,
                "event already handled within idempotency window"
            );
            return Ok(TriggerOutcome::Duplicate);
        }

        let input = json!({
            "instituteId": institute_id,
            "eventName": event_name,
            "payload": payload,
        });

        let execution_id = (self.dispatch)(trigger.workflow_id, input)
            .await
            .map_err(TriggerError::Dispatch)?;

        tracing::info!(
            %institute_id,
            event_name,
            workflow_id = %trigger.workflow_id,
            execution = %execution_id,
            "event dispatched to workflow"
        );

        Ok(TriggerOutcome::Dispatched { execution_id })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use campusflow_types::trigger::{IdempotencySetting, NodeDedupeRecord};
    use campusflow_types::workflow::DefinitionStatus;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryTriggers {
        triggers: Mutex<Vec<WorkflowTrigger>>,
    }

    impl TriggerRepository for MemoryTriggers {
        async fn find_active(
            &self,
            institute_id: &Uuid,
            event_name: &str,
        ) -> Result<Option<WorkflowTrigger>, RepositoryError> {
            Ok(self
                .triggers
                .lock()
                .unwrap()
                .iter()
                .find(|t| {
                    &t.institute_id == institute_id
                        && t.event_name == event_name
                        && t.status == DefinitionStatus::Active
                })
                .cloned())
        }

        async fn save_trigger(&self, trigger: &WorkflowTrigger) -> Result<(), RepositoryError> {
            self.triggers.lock().unwrap().push(trigger.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryLedger {
        rows: Mutex<HashMap<String, NodeDedupeRecord>>,
    }

    impl DedupeRepository for MemoryLedger {
        async fn reserve(&self, record: &NodeDedupeRecord) -> Result<bool, RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            let key = format!("{}|{}", record.workflow_id, record.operation_key);
            if let Some(existing) = rows.get(&key) {
                let expired = existing
                    .expires_at
                    .map(|at| at <= record.reserved_at)
                    .unwrap_or(false);
                if !expired {
                    return Ok(false);
                }
            }
            rows.insert(key, record.clone());
            Ok(true)
        }
    }

    fn recording_dispatch() -> (TriggerDispatchFn, Arc<Mutex<Vec<(Uuid, Value)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&calls);
        let dispatch: TriggerDispatchFn = Arc::new(move |workflow_id, input| {
            let record = Arc::clone(&record);
            Box::pin(async move {
                record.lock().unwrap().push((workflow_id, input));
                Ok(Uuid::now_v7())
            })
        });
        (dispatch, calls)
    }

    fn context_trigger(
        institute_id: Uuid,
        event_name: &str,
        fields: &[&str],
        ttl_secs: Option<u64>,
    ) -> WorkflowTrigger {
        WorkflowTrigger {
            id: Uuid::now_v7(),
            institute_id,
            event_name: event_name.to_string(),
            workflow_id: Uuid::now_v7(),
            status: DefinitionStatus::Active,
            idempotency: IdempotencySetting {
                strategy: IdempotencyStrategy::ContextBased,
                context_fields: fields.iter().map(|s| s.to_string()).collect(),
                ttl_secs,
            },
        }
    }

    // -------------------------------------------------------------------
    // derive_idempotency_key
    // -------------------------------------------------------------------

    #[test]
    fn test_key_deterministic_for_same_context() {
        let trigger = context_trigger(
            Uuid::now_v7(),
            "student.admitted",
            &["studentId", "batchId"],
            None,
        );
        let payload = json!({ "studentId": "s-1", "batchId": "b-1" });
        assert_eq!(
            derive_idempotency_key(&trigger, &payload),
            derive_idempotency_key(&trigger, &payload)
        );
    }

    #[test]
    fn test_key_varies_with_context_fields() {
        let trigger = context_trigger(Uuid::now_v7(), "student.admitted", &["studentId"], None);
        let a = derive_idempotency_key(&trigger, &json!({ "studentId": "s-1" }));
        let b = derive_idempotency_key(&trigger, &json!({ "studentId": "s-2" }));
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_ignores_unlisted_fields() {
        let trigger = context_trigger(Uuid::now_v7(), "student.admitted", &["studentId"], None);
        let a = derive_idempotency_key(
            &trigger,
            &json!({ "studentId": "s-1", "noise": "x" }),
        );
        let b = derive_idempotency_key(
            &trigger,
            &json!({ "studentId": "s-1", "noise": "y" }),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_supports_dotted_paths() {
        let trigger =
            context_trigger(Uuid::now_v7(), "payment.received", &["payment.orderId"], None);
        let a = derive_idempotency_key(
            &trigger,
            &json!({ "payment": { "orderId": "o-1" } }),
        );
        let b = derive_idempotency_key(
            &trigger,
            &json!({ "payment": { "orderId": "o-2" } }),
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_missing_field_folds_as_empty() {
        let trigger = context_trigger(Uuid::now_v7(), "student.admitted", &["studentId"], None);
        let a = derive_idempotency_key(&trigger, &json!({}));
        let b = derive_idempotency_key(&trigger, &json!({ "other": 1 }));
        assert_eq!(a, b);
    }

    #[test]
    fn test_trigger_scoped_key_ignores_payload() {
        let mut trigger = context_trigger(Uuid::now_v7(), "term.closed", &[], None);
        trigger.idempotency.strategy = IdempotencyStrategy::TriggerScoped;
        let a = derive_idempotency_key(&trigger, &json!({ "x": 1 }));
        let b = derive_idempotency_key(&trigger, &json!({ "x": 2 }));
        assert_eq!(a, b);
    }

    // -------------------------------------------------------------------
    // route
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_route_dispatches_first_occurrence() {
        let triggers = MemoryTriggers::default();
        let institute_id = Uuid::now_v7();
        let trigger = context_trigger(institute_id, "student.admitted", &["studentId"], None);
        triggers.save_trigger(&trigger).await.unwrap();

        let (dispatch, calls) = recording_dispatch();
        let router = TriggerRouter::new(triggers, MemoryLedger::default(), dispatch);

        let outcome = router
            .route(institute_id, "student.admitted", json!({ "studentId": "s-1" }))
            .await
            .unwrap();
        assert!(matches!(outcome, TriggerOutcome::Dispatched { .. }));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (workflow_id, input) = &calls[0];
        assert_eq!(workflow_id, &trigger.workflow_id);
        assert_eq!(input["eventName"], "student.admitted");
        assert_eq!(input["payload"]["studentId"], "s-1");
        assert_eq!(input["instituteId"], json!(institute_id));
    }

    #[tokio::test]
    async fn test_route_duplicate_event_is_noop() {
        let triggers = MemoryTriggers::default();
        let institute_id = Uuid::now_v7();
        let trigger =
            context_trigger(institute_id, "student.admitted", &["studentId"], Some(3600));
        triggers.save_trigger(&trigger).await.unwrap();

        let (dispatch, calls) = recording_dispatch();
        let router = TriggerRouter::new(triggers, MemoryLedger::default(), dispatch);

        let payload = json!({ "studentId": "s-1" });
        let first = router
            .route(institute_id, "student.admitted", payload.clone())
            .await
            .unwrap();
        assert!(matches!(first, TriggerOutcome::Dispatched { .. }));

        let second = router
            .route(institute_id, "student.admitted", payload)
            .await
            .unwrap();
        assert_eq!(second, TriggerOutcome::Duplicate);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_route_distinct_contexts_both_dispatch() {
        let triggers = MemoryTriggers::default();
        let institute_id = Uuid::now_v7();
        let trigger = context_trigger(institute_id, "student.admitted", &["studentId"], None);
        triggers.save_trigger(&trigger).await.unwrap();

        let (dispatch, calls) = recording_dispatch();
        let router = TriggerRouter::new(triggers, MemoryLedger::default(), dispatch);

        router
            .route(institute_id, "student.admitted", json!({ "studentId": "s-1" }))
            .await
            .unwrap();
        router
            .route(institute_id, "student.admitted", json!({ "studentId": "s-2" }))
            .await
            .unwrap();
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_route_unbound_event() {
        let (dispatch, calls) = recording_dispatch();
        let router =
            TriggerRouter::new(MemoryTriggers::default(), MemoryLedger::default(), dispatch);

        let outcome = router
            .route(Uuid::now_v7(), "unknown.event", json!({}))
            .await
            .unwrap();
        assert_eq!(outcome, TriggerOutcome::NoTrigger);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_route_inactive_trigger_not_matched() {
        let triggers = MemoryTriggers::default();
        let institute_id = Uuid::now_v7();
        let mut trigger = context_trigger(institute_id, "student.admitted", &[], None);
        trigger.status = DefinitionStatus::Inactive;
        triggers.save_trigger(&trigger).await.unwrap();

        let (dispatch, _) = recording_dispatch();
        let router = TriggerRouter::new(triggers, MemoryLedger::default(), dispatch);

        let outcome = router
            .route(institute_id, "student.admitted", json!({}))
            .await
            .unwrap();
        assert_eq!(outcome, TriggerOutcome::NoTrigger);
    }

    #[tokio::test]
    async fn test_route_dispatch_failure_surfaces() {
        let triggers = MemoryTriggers::default();
        let institute_id = Uuid::now_v7();
        let trigger = context_trigger(institute_id, "student.admitted", &[], None);
        triggers.save_trigger(&trigger).await.unwrap();

        let dispatch: TriggerDispatchFn =
            Arc::new(|_, _| Box::pin(async { Err("engine down".to_string()) }));
        let router = TriggerRouter::new(triggers, MemoryLedger::default(), dispatch);

        let err = router
            .route(institute_id, "student.admitted", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::Dispatch(_)));
    }
}
