//! Trigger repository trait.

use campusflow_types::error::RepositoryError;
use campusflow_types::trigger::WorkflowTrigger;
use uuid::Uuid;

/// Repository trait for event trigger bindings.
pub trait TriggerRepository: Send + Sync {
    /// Find the Active trigger bound to `(institute_id, event_name)`.
    fn find_active(
        &self,
        institute_id: &Uuid,
        event_name: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowTrigger>, RepositoryError>> + Send;

    /// Upsert a trigger binding.
    fn save_trigger(
        &self,
        trigger: &WorkflowTrigger,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
