//! Definition store: workflow and ordered node resolution.
//!
//! `DefinitionStore` is the read surface the engine uses to turn a workflow
//! id into an executable plan: the workflow row plus its node chain, each
//! node carrying the template's base config shallow-merged with the
//! mapping's override config. Structural invariants (total order, exactly
//! one start node, active templates) are enforced here so the runtime never
//! sees a malformed chain.

use std::collections::HashSet;

use campusflow_types::workflow::{
    DefinitionStatus, NodeTemplate, Workflow, WorkflowNodeMapping,
};
use campusflow_types::error::RepositoryError;
use serde_json::Value;
use uuid::Uuid;

use crate::repository::definition::DefinitionRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while resolving catalog definitions.
///
/// These are the engine's only fatal errors: they surface before any
/// execution record is written.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("workflow {0} is not active")]
    WorkflowInactive(Uuid),

    #[error("node template {0} not found")]
    TemplateNotFound(Uuid),

    #[error("node template {0} is not active")]
    TemplateInactive(Uuid),

    #[error("workflow {0} has no node mappings")]
    EmptyWorkflow(Uuid),

    #[error("workflow {workflow_id} has duplicate node order {node_order}")]
    DuplicateOrder { workflow_id: Uuid, node_order: i32 },

    #[error("workflow {workflow_id} must have exactly one start node, found {count}")]
    StartNodeInvariant { workflow_id: Uuid, count: usize },

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// ResolvedNode
// ---------------------------------------------------------------------------

/// One executable node: the mapping, its template, and the merged config.
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    pub mapping: WorkflowNodeMapping,
    pub template: NodeTemplate,
    /// Template base config with the mapping's overrides merged on top.
    pub config: Value,
}

// ---------------------------------------------------------------------------
// Config merging
// ---------------------------------------------------------------------------

/// Shallow JSON merge of `overlay` over `base`.
///
/// Override keys replace base keys; arrays are replaced, not concatenated.
/// Non-object overlays replace the base wholesale.
pub fn merge_config(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

// ---------------------------------------------------------------------------
// DefinitionStore
// ---------------------------------------------------------------------------

/// Read surface over the workflow catalog.
///
/// Generic over `R: DefinitionRepository` for storage flexibility.
pub struct DefinitionStore<R: DefinitionRepository> {
    repo: R,
}

impl<R: DefinitionRepository> DefinitionStore<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Fetch an Active workflow.
    pub async fn get_workflow(&self, id: &Uuid) -> Result<Workflow, CatalogError> {
        let workflow = self
            .repo
            .get_workflow(id)
            .await?
            .ok_or(CatalogError::WorkflowNotFound(*id))?;

        if workflow.status != DefinitionStatus::Active {
            return Err(CatalogError::WorkflowInactive(*id));
        }

        Ok(workflow)
    }

    /// Resolve a workflow's executable node chain, ascending by
    /// `node_order`, with each template's config merged under the mapping's
    /// overrides.
    pub async fn get_ordered_nodes(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Vec<ResolvedNode>, CatalogError> {
        let mut mappings = self.repo.list_node_mappings(workflow_id).await?;
        if mappings.is_empty() {
            return Err(CatalogError::EmptyWorkflow(*workflow_id));
        }

        mappings.sort_by_key(|m| m.node_order);

        let mut seen_orders = HashSet::new();
        for mapping in &mappings {
            if !seen_orders.insert(mapping.node_order) {
                return Err(CatalogError::DuplicateOrder {
                    workflow_id: *workflow_id,
                    node_order: mapping.node_order,
                });
            }
        }

        let start_count = mappings.iter().filter(|m| m.is_start_node).count();
        if start_count != 1 {
            return Err(CatalogError::StartNodeInvariant {
                workflow_id: *workflow_id,
                count: start_count,
            });
        }

        let mut nodes = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            let template = self
                .repo
                .get_node_template(&mapping.node_template_id)
                .await?
                .ok_or(CatalogError::TemplateNotFound(mapping.node_template_id))?;

            if template.status != DefinitionStatus::Active {
                return Err(CatalogError::TemplateInactive(template.id));
            }

            let config = match &mapping.override_config {
                Some(overrides) => merge_config(&template.config, overrides),
                None => template.config.clone(),
            };

            nodes.push(ResolvedNode {
                mapping,
                template,
                config,
            });
        }

        tracing::debug!(
            %workflow_id,
            nodes = nodes.len(),
            "resolved workflow node chain"
        );

        Ok(nodes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
