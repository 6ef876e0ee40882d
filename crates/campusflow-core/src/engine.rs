//! Execution runtime: walks a workflow's node chain and records outcomes.
//!
//! The engine owns the execution state machine
//! `Created -> Running -> (Completed | Failed | Waiting)`:
//!
//! 1. Resolve the workflow and its ordered nodes (definition errors abort
//!    here, before any record is written).
//! 2. Create the `WorkflowExecution` row with `status = Running`.
//! 3. Per node, strictly in order: reserve the node's dedupe key when
//!    configured, open a `WorkflowExecutionLog`, invoke the resolved
//!    strategy, merge its result into the context under the node's name,
//!    and complete the log based on the presence of an `error` key.
//! 4. A failed node aborts or continues per the mapping's `on_error`
//!    policy; a `wait` marker parks the execution in `Waiting`.
//! 5. Serialize the final context into `output_data` on every exit path.
//!
//! Node-level failures never propagate to the caller -- they are data on
//! the log rows. Cancellation is cooperative: `mark_cancelled` flips a
//! token that is only honored between node steps.

use campusflow_types::error::RepositoryError;
use campusflow_types::workflow::{
    ErrorPolicy, ExecutionStatus, NodeRunStatus, WorkflowExecution, WorkflowExecutionLog,
};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::{CatalogError, DefinitionStore, ResolvedNode};
use crate::context::ExecutionContext;
use crate::dedupe::DedupeGuard;
use crate::expression::Evaluator;
use crate::repository::dedupe::DedupeRepository;
use crate::repository::definition::DefinitionRepository;
use crate::repository::execution::ExecutionRepository;
use crate::strategy::StrategyRegistry;
use crate::strategy::config::NodeConfig;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What caused an execution to be dispatched.
#[derive(Debug, Clone)]
pub enum ExecutionOrigin {
    /// On-demand dispatch.
    Manual,
    /// Dispatched by the scheduler for a planned run.
    Schedule {
        schedule_id: Uuid,
        schedule_run_id: Uuid,
    },
    /// Dispatched by the trigger router for an application event.
    Event { event_name: String },
}

/// Result of a finished (or parked) execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Execution primary key.
    pub id: Uuid,
    /// Externally addressable handle.
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// Final context snapshot, as persisted to `output_data`.
    pub output: Value,
}

/// Errors the engine surfaces to its caller.
///
/// Only unrecoverable definition errors and persistence failures appear
/// here; node action failures are recorded on logs instead.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("definition error: {0}")]
    Definition(#[from] CatalogError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// The workflow execution runtime.
///
/// Generic over the definition, execution, and dedupe repository ports for
/// storage flexibility.
pub struct ExecutionEngine<D, E, L>
where
    D: DefinitionRepository,
    E: ExecutionRepository,
    L: DedupeRepository,
{
    catalog: DefinitionStore<D>,
    repo: E,
    registry: Arc<StrategyRegistry>,
    guard: DedupeGuard<L>,
    evaluator: Evaluator,
    /// Cancellation tokens keyed by execution primary key.
    cancellations: DashMap<Uuid, tokio_util::sync::CancellationToken>,
}

impl<D, E, L> ExecutionEngine<D, E, L>
where
    D: DefinitionRepository,
    E: ExecutionRepository,
    L: DedupeRepository,
{
    pub fn new(
        definitions: D,
        executions: E,
        dedupe: L,
        registry: Arc<StrategyRegistry>,
    ) -> Self {
        Self {
            catalog: DefinitionStore::new(definitions),
            repo: executions,
            registry,
            guard: DedupeGuard::new(dedupe),
            evaluator: Evaluator::new(),
            cancellations: DashMap::new(),
        }
    }

    /// Access the execution repository (for read surfaces).
    pub fn repo(&self) -> &E {
        &self.repo
    }

    /// Mark a running execution for cooperative cancellation.
    ///
    /// Takes effect before the next node step; there is no preemption
    /// mid-node. Returns `false` when no such execution is running.
    pub fn mark_cancelled(&self, execution_pk: Uuid) -> bool {
        match self.cancellations.get(&execution_pk) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run a workflow to completion (or until it fails, waits, or is
    /// cancelled).
    pub async fn execute(
        &self,
        workflow_id: Uuid,
        input: Value,
        origin: ExecutionOrigin,
    ) -> Result<ExecutionOutcome, EngineError> {
        let workflow = self.catalog.get_workflow(&workflow_id).await?;
        let nodes = self.catalog.get_ordered_nodes(&workflow_id).await?;

        let pk = Uuid::now_v7();
        let handle = format!("wx-{}", pk.simple());
        let (schedule_id, schedule_run_id) = match &origin {
            ExecutionOrigin::Schedule {
                schedule_id,
                schedule_run_id,
            } => (Some(*schedule_id), Some(*schedule_run_id)),
            _ => (None, None),
        };

        let execution = WorkflowExecution {
            id: pk,
            execution_id: handle.clone(),
            workflow_id,
            schedule_id,
            schedule_run_id,
            status: ExecutionStatus::Running,
            current_node_link_id: Some(nodes[0].mapping.id),
            input_data: input.clone(),
            output_data: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.repo.create_execution(&execution).await?;

        let token = tokio_util::sync::CancellationToken::new();
        self.cancellations.insert(pk, token.clone());

        tracing::info!(
            execution = handle.as_str(),
            workflow = workflow.name.as_str(),
            origin = ?origin,
            nodes = nodes.len(),
            "starting workflow execution"
        );

        let mut ctx = ExecutionContext::new(workflow.name.clone(), handle.clone(), input);
        let mut final_status = ExecutionStatus::Completed;

        for node in &nodes {
            if token.is_cancelled() {
                tracing::info!(execution = handle.as_str(), "execution cancelled");
                final_status = ExecutionStatus::Failed;
                break;
            }

            self.repo
                .update_execution(&pk, ExecutionStatus::Running, Some(&node.mapping.id), None)
                .await?;

            let parsed = NodeConfig::from_value(&node.config);

            // Dedupe reservation happens before the log is opened: a
            // duplicate node leaves a Skipped record and no action runs.
            if let Ok(config) = &parsed {
                if let Some(dedupe) = &config.dedupe {
                    let expr_ctx = ctx.to_expression_context();
                    let key =
                        self.evaluator.evaluate_to_string(&dedupe.key, &expr_ctx, "");
                    if key.is_empty() {
                        tracing::warn!(
                            node = node.template.name.as_str(),
                            "dedupe key resolved empty, reservation skipped"
                        );
                    } else {
                        let scope = dedupe
                            .scope
                            .as_ref()
                            .map(|s| self.evaluator.evaluate_to_string(s, &expr_ctx, ""))
                            .filter(|s| !s.is_empty());
                        let reserved = self
                            .guard
                            .reserve(
                                workflow_id,
                                Some(node.template.id),
                                scope,
                                schedule_run_id,
                                &key,
                                None,
                            )
                            .await?;
                        if !reserved {
                            self.record_skipped(pk, node, &key).await?;
                            continue;
                        }
                    }
                }
            }

            let log_id = self.open_log(pk, node).await?;
            let started = std::time::Instant::now();

            let (result, error_type) = match &parsed {
                Err(msg) => (
                    json!({ "error": msg }),
                    Some("CONFIGURATION".to_string()),
                ),
                Ok(config) => match self.registry.resolve(config.request_type.as_deref()) {
                    None => (
                        json!({
                            "error": format!(
                                "no strategy registered for request type '{}'",
                                config.request_type.as_deref().unwrap_or("EXTERNAL")
                            )
                        }),
                        Some("CONFIGURATION".to_string()),
                    ),
                    Some(strategy) => {
                        let expr_ctx = ctx.to_expression_context();
                        let result = strategy.execute(&expr_ctx, config).await;
                        let error_type = result
                            .get("error")
                            .is_some()
                            .then(|| "ACTION".to_string());
                        (result, error_type)
                    }
                },
            };

            // The result lands in the context whether or not the node
            // failed; downstream nodes may inspect the error map.
            ctx.insert_node_output(&node.template.name, result.clone());

            let failed = result.get("error").is_some();
            let error_message = result
                .get("error")
                .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()));
            let elapsed_ms = started.elapsed().as_millis() as i64;

            self.repo
                .complete_log(
                    &log_id,
                    if failed {
                        NodeRunStatus::Failure
                    } else {
                        NodeRunStatus::Success
                    },
                    elapsed_ms,
                    Some(&result),
                    error_message.as_deref(),
                    error_type.as_deref(),
                )
                .await?;

            if failed {
                tracing::warn!(
                    execution = handle.as_str(),
                    node = node.template.name.as_str(),
                    error = error_message.as_deref().unwrap_or(""),
                    policy = ?node.mapping.on_error,
                    "node failed"
                );
                if node.mapping.on_error == ErrorPolicy::Abort {
                    final_status = ExecutionStatus::Failed;
                    break;
                }
            } else if wants_wait(&result) {
                tracing::info!(
                    execution = handle.as_str(),
                    node = node.template.name.as_str(),
                    "node requested wait, parking execution"
                );
                final_status = ExecutionStatus::Waiting;
                break;
            }

            if node.mapping.is_end_node {
                break;
            }
        }

        self.cancellations.remove(&pk);

        let output = ctx.to_json();
        self.repo
            .update_execution(&pk, final_status, None, Some(&output))
            .await?;

        tracing::info!(
            execution = handle.as_str(),
            status = ?final_status,
            "workflow execution finished"
        );

        Ok(ExecutionOutcome {
            id: pk,
            execution_id: handle,
            status: final_status,
            output,
        })
    }

    async fn open_log(
        &self,
        execution_pk: Uuid,
        node: &ResolvedNode,
    ) -> Result<Uuid, EngineError> {
        let log_id = Uuid::now_v7();
        let log = WorkflowExecutionLog {
            id: log_id,
            execution_id: execution_pk,
            node_template_id: node.template.id,
            node_name: node.template.name.clone(),
            node_type: node.template.node_type.clone(),
            status: NodeRunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            execution_time_ms: None,
            details: None,
            error_message: None,
            error_type: None,
        };
        self.repo.create_log(&log).await?;
        Ok(log_id)
    }

    async fn record_skipped(
        &self,
        execution_pk: Uuid,
        node: &ResolvedNode,
        operation_key: &str,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        let log = WorkflowExecutionLog {
            id: Uuid::now_v7(),
            execution_id: execution_pk,
            node_template_id: node.template.id,
            node_name: node.template.name.clone(),
            node_type: node.template.node_type.clone(),
            status: NodeRunStatus::Skipped,
            started_at: now,
            completed_at: Some(now),
            execution_time_ms: Some(0),
            details: Some(json!({ "skipped": true, "operationKey": operation_key })),
            error_message: None,
            error_type: None,
        };
        self.repo.create_log(&log).await?;
        Ok(())
    }
}

/// Whether a node result instructs the runtime to park the execution.
///
/// Recognized at the top level of the result map or inside a response
/// `body` (so an internal service can answer `{"wait": true}`).
fn wants_wait(result: &Value) -> bool {
    result
        .get("wait")
        .or_else(|| result.get("body").and_then(|b| b.get("wait")))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
