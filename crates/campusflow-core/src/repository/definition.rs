//! Definition repository trait.
//!
//! Storage interface for the workflow catalog: workflows, node templates,
//! and the mappings linking them. The catalog is pure data; behavior lives
//! in `crate::catalog`.

use campusflow_types::error::RepositoryError;
use campusflow_types::workflow::{NodeTemplate, Workflow, WorkflowNodeMapping};
use uuid::Uuid;

/// Repository trait for workflow catalog persistence.
pub trait DefinitionRepository: Send + Sync {
    /// Get a workflow by its UUID.
    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Workflow>, RepositoryError>> + Send;

    /// Upsert a workflow (insert or replace by ID).
    fn save_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a node template by its UUID.
    fn get_node_template(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<NodeTemplate>, RepositoryError>> + Send;

    /// Upsert a node template.
    fn save_node_template(
        &self,
        template: &NodeTemplate,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List a workflow's node mappings, ordered ascending by `node_order`.
    ///
    /// The result is finite and restartable (a fresh query per call, not a
    /// live cursor).
    fn list_node_mappings(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowNodeMapping>, RepositoryError>> + Send;

    /// Upsert a node mapping.
    fn save_node_mapping(
        &self,
        mapping: &WorkflowNodeMapping,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
