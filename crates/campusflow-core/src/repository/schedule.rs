//! Schedule repository trait.
//!
//! Storage interface for schedules and their planned runs. The critical
//! operation is `create_run_and_advance`: run creation and schedule
//! advancement must commit in one transaction so concurrent scheduler
//! instances cannot double-fire; the `dedupe_key` uniqueness constraint is
//! the backstop.

use campusflow_types::error::RepositoryError;
use campusflow_types::schedule::{
    ScheduleRunStatus, WorkflowSchedule, WorkflowScheduleRun,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Repository trait for schedule persistence.
pub trait ScheduleRepository: Send + Sync {
    /// Upsert a schedule.
    fn save_schedule(
        &self,
        schedule: &WorkflowSchedule,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a schedule by its UUID.
    fn get_schedule(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowSchedule>, RepositoryError>> + Send;

    /// List Active schedules due at `now`: `next_run_at <= now` and inside
    /// the `[start_date, end_date]` validity window.
    fn list_due(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowSchedule>, RepositoryError>> + Send;

    /// Atomically insert a planned run and advance the schedule's
    /// `last_run_at`/`next_run_at` in the same transaction.
    ///
    /// Returns `false` when the run's `dedupe_key` already exists (another
    /// tick or instance planned this firing); the advancement still applies
    /// so a lost race cannot wedge the schedule.
    fn create_run_and_advance(
        &self,
        run: &WorkflowScheduleRun,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Update a run's dispatch outcome.
    fn update_run(
        &self,
        run_id: &Uuid,
        status: ScheduleRunStatus,
        fired_at: Option<DateTime<Utc>>,
        execution_id: Option<&Uuid>,
        error_message: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List runs for a schedule, ordered by `planned_run_at` DESC.
    fn list_runs(
        &self,
        schedule_id: &Uuid,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowScheduleRun>, RepositoryError>> + Send;
}
