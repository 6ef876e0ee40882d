//! SQLite schedule repository implementation.
//!
//! The heart of the scheduler's race safety lives here:
//! `create_run_and_advance` inserts the planned run (no-op on a
//! `dedupe_key` conflict) and advances the schedule in one transaction, so
//! concurrent ticks across engine instances can never double-fire a
//! planned minute.

use campusflow_core::repository::schedule::ScheduleRepository;
use campusflow_types::error::RepositoryError;
use campusflow_types::schedule::{
    ScheduleCadence, ScheduleRunStatus, WorkflowSchedule, WorkflowScheduleRun,
};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{
    enum_from_str, enum_to_str, format_datetime, parse_datetime, parse_opt_datetime,
    parse_opt_uuid, parse_uuid,
};

/// SQLite-backed implementation of `ScheduleRepository`.
pub struct SqliteScheduleRepository {
    pool: DatabasePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ScheduleRow {
    id: String,
    workflow_id: String,
    cadence: String,
    timezone: String,
    start_date: Option<String>,
    end_date: Option<String>,
    status: String,
    last_run_at: Option<String>,
    next_run_at: Option<String>,
}

impl ScheduleRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            cadence: row.try_get("cadence")?,
            timezone: row.try_get("timezone")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            status: row.try_get("status")?,
            last_run_at: row.try_get("last_run_at")?,
            next_run_at: row.try_get("next_run_at")?,
        })
    }

    fn into_schedule(self) -> Result<WorkflowSchedule, RepositoryError> {
        let cadence: ScheduleCadence = serde_json::from_str(&self.cadence)
            .map_err(|e| RepositoryError::Query(format!("invalid cadence JSON: {e}")))?;

        Ok(WorkflowSchedule {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            cadence,
            timezone: self.timezone,
            start_date: parse_opt_datetime(self.start_date.as_deref())?,
            end_date: parse_opt_datetime(self.end_date.as_deref())?,
            status: enum_from_str(&self.status)?,
            last_run_at: parse_opt_datetime(self.last_run_at.as_deref())?,
            next_run_at: parse_opt_datetime(self.next_run_at.as_deref())?,
        })
    }
}

struct RunRow {
    id: String,
    schedule_id: String,
    workflow_id: String,
    planned_run_at: String,
    fired_at: Option<String>,
    status: String,
    dedupe_key: String,
    execution_id: Option<String>,
    error_message: Option<String>,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            schedule_id: row.try_get("schedule_id")?,
            workflow_id: row.try_get("workflow_id")?,
            planned_run_at: row.try_get("planned_run_at")?,
            fired_at: row.try_get("fired_at")?,
            status: row.try_get("status")?,
            dedupe_key: row.try_get("dedupe_key")?,
            execution_id: row.try_get("execution_id")?,
            error_message: row.try_get("error_message")?,
        })
    }

    fn into_run(self) -> Result<WorkflowScheduleRun, RepositoryError> {
        Ok(WorkflowScheduleRun {
            id: parse_uuid(&self.id)?,
            schedule_id: parse_uuid(&self.schedule_id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            planned_run_at: parse_datetime(&self.planned_run_at)?,
            fired_at: parse_opt_datetime(self.fired_at.as_deref())?,
            status: enum_from_str(&self.status)?,
            dedupe_key: self.dedupe_key,
            execution_id: parse_opt_uuid(self.execution_id.as_deref())?,
            error_message: self.error_message,
        })
    }
}

// ---------------------------------------------------------------------------
// ScheduleRepository impl
// ---------------------------------------------------------------------------

impl ScheduleRepository for SqliteScheduleRepository {
    async fn save_schedule(&self, schedule: &WorkflowSchedule) -> Result<(), RepositoryError> {
        let cadence = serde_json::to_string(&schedule.cadence)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_schedules
               (id, workflow_id, cadence, timezone, start_date, end_date, status, last_run_at, next_run_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 cadence = excluded.cadence,
                 timezone = excluded.timezone,
                 start_date = excluded.start_date,
                 end_date = excluded.end_date,
                 status = excluded.status,
                 last_run_at = excluded.last_run_at,
                 next_run_at = excluded.next_run_at"#,
        )
        .bind(schedule.id.to_string())
        .bind(schedule.workflow_id.to_string())
        .bind(&cadence)
        .bind(&schedule.timezone)
        .bind(schedule.start_date.as_ref().map(format_datetime))
        .bind(schedule.end_date.as_ref().map(format_datetime))
        .bind(enum_to_str(&schedule.status)?)
        .bind(schedule.last_run_at.as_ref().map(format_datetime))
        .bind(schedule.next_run_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_schedule(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowSchedule>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_schedules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ScheduleRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_schedule()?))
            }
            None => Ok(None),
        }
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowSchedule>, RepositoryError> {
        let now_str = format_datetime(&now);
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_schedules
               WHERE status = 'active'
                 AND next_run_at IS NOT NULL AND next_run_at <= ?
                 AND (start_date IS NULL OR start_date <= ?)
                 AND (end_date IS NULL OR end_date >= ?)
               ORDER BY next_run_at ASC"#,
        )
        .bind(&now_str)
        .bind(&now_str)
        .bind(&now_str)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut schedules = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ScheduleRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            schedules.push(r.into_schedule()?);
        }
        Ok(schedules)
    }

    async fn create_run_and_advance(
        &self,
        run: &WorkflowScheduleRun,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // The dedupe_key uniqueness constraint makes this insert the race
        // arbiter: exactly one concurrent tick wins the planned minute.
        let inserted = sqlx::query(
            r#"INSERT INTO workflow_schedule_runs
               (id, schedule_id, workflow_id, planned_run_at, fired_at, status, dedupe_key, execution_id, error_message)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(dedupe_key) DO NOTHING"#,
        )
        .bind(run.id.to_string())
        .bind(run.schedule_id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(format_datetime(&run.planned_run_at))
        .bind(run.fired_at.as_ref().map(format_datetime))
        .bind(enum_to_str(&run.status)?)
        .bind(&run.dedupe_key)
        .bind(run.execution_id.map(|id| id.to_string()))
        .bind(&run.error_message)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // Advancement applies regardless of who won, so a lost race cannot
        // wedge the schedule.
        sqlx::query(
            "UPDATE workflow_schedules SET last_run_at = ?, next_run_at = ? WHERE id = ?",
        )
        .bind(format_datetime(&last_run_at))
        .bind(next_run_at.as_ref().map(format_datetime))
        .bind(run.schedule_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(inserted.rows_affected() > 0)
    }

    async fn update_run(
        &self,
        run_id: &Uuid,
        status: ScheduleRunStatus,
        fired_at: Option<DateTime<Utc>>,
        execution_id: Option<&Uuid>,
        error_message: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_schedule_runs SET
                 status = ?,
                 fired_at = COALESCE(?, fired_at),
                 execution_id = COALESCE(?, execution_id),
                 error_message = ?
               WHERE id = ?"#,
        )
        .bind(enum_to_str(&status)?)
        .bind(fired_at.as_ref().map(format_datetime))
        .bind(execution_id.map(|id| id.to_string()))
        .bind(error_message)
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn list_runs(
        &self,
        schedule_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<WorkflowScheduleRun>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_schedule_runs WHERE schedule_id = ? ORDER BY planned_run_at DESC LIMIT ?",
        )
        .bind(schedule_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = RunRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            runs.push(r.into_run()?);
        }
        Ok(runs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use campusflow_core::scheduler::dedupe_key;
    use campusflow_types::schedule::ScheduleStatus;
    use chrono::Duration;
    use std::sync::Arc;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn sample_schedule(next_run_at: Option<DateTime<Utc>>) -> WorkflowSchedule {
        WorkflowSchedule {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            cadence: ScheduleCadence::EveryMinutes { minutes: 15 },
            timezone: "Asia/Kolkata".to_string(),
            start_date: None,
            end_date: None,
            status: ScheduleStatus::Active,
            last_run_at: None,
            next_run_at,
        }
    }

    fn planned_run(schedule: &WorkflowSchedule, planned: DateTime<Utc>) -> WorkflowScheduleRun {
        WorkflowScheduleRun {
            id: Uuid::now_v7(),
            schedule_id: schedule.id,
            workflow_id: schedule.workflow_id,
            planned_run_at: planned,
            fired_at: None,
            status: ScheduleRunStatus::Created,
            dedupe_key: dedupe_key(schedule.id, planned),
            execution_id: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_get_schedule() {
        let repo = SqliteScheduleRepository::new(test_pool().await);
        let schedule = sample_schedule(Some(Utc::now()));
        repo.save_schedule(&schedule).await.unwrap();

        let loaded = repo.get_schedule(&schedule.id).await.unwrap().unwrap();
        assert_eq!(loaded.timezone, "Asia/Kolkata");
        assert_eq!(loaded.cadence, ScheduleCadence::EveryMinutes { minutes: 15 });
        assert_eq!(loaded.status, ScheduleStatus::Active);
    }

    #[tokio::test]
    async fn test_list_due_filters() {
        let repo = SqliteScheduleRepository::new(test_pool().await);
        let now = Utc::now();

        let due = sample_schedule(Some(now - Duration::minutes(1)));
        let future = sample_schedule(Some(now + Duration::minutes(10)));
        let mut paused = sample_schedule(Some(now - Duration::minutes(1)));
        paused.status = ScheduleStatus::Paused;
        let mut expired = sample_schedule(Some(now - Duration::minutes(1)));
        expired.end_date = Some(now - Duration::days(1));
        let unplanned = sample_schedule(None);

        for schedule in [&due, &future, &paused, &expired, &unplanned] {
            repo.save_schedule(schedule).await.unwrap();
        }

        let found = repo.list_due(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[tokio::test]
    async fn test_create_run_and_advance_updates_schedule() {
        let repo = SqliteScheduleRepository::new(test_pool().await);
        let now = Utc::now();
        let schedule = sample_schedule(Some(now));
        repo.save_schedule(&schedule).await.unwrap();

        let run = planned_run(&schedule, now);
        let next = now + Duration::minutes(15);
        let created = repo
            .create_run_and_advance(&run, now, Some(next))
            .await
            .unwrap();
        assert!(created);

        let advanced = repo.get_schedule(&schedule.id).await.unwrap().unwrap();
        assert_eq!(advanced.last_run_at.unwrap(), now);
        assert_eq!(advanced.next_run_at.unwrap(), next);

        let runs = repo.list_runs(&schedule.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, ScheduleRunStatus::Created);
        assert_eq!(runs[0].dedupe_key, run.dedupe_key);
    }

    #[tokio::test]
    async fn test_duplicate_dedupe_key_advances_but_creates_nothing() {
        let repo = SqliteScheduleRepository::new(test_pool().await);
        let now = Utc::now();
        let schedule = sample_schedule(Some(now));
        repo.save_schedule(&schedule).await.unwrap();

        let first = planned_run(&schedule, now);
        assert!(repo.create_run_and_advance(&first, now, None).await.unwrap());

        // Same planned minute from a concurrent tick.
        let second = planned_run(&schedule, now);
        let later_next = now + Duration::minutes(15);
        let created = repo
            .create_run_and_advance(&second, now, Some(later_next))
            .await
            .unwrap();
        assert!(!created);

        let runs = repo.list_runs(&schedule.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, first.id);

        // The losing tick's advancement still landed.
        let advanced = repo.get_schedule(&schedule.id).await.unwrap().unwrap();
        assert_eq!(advanced.next_run_at.unwrap(), later_next);
    }

    #[tokio::test]
    async fn test_concurrent_ticks_create_at_most_one_run() {
        let repo = Arc::new(SqliteScheduleRepository::new(test_pool().await));
        let now = Utc::now();
        let schedule = sample_schedule(Some(now));
        repo.save_schedule(&schedule).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            let run = planned_run(&schedule, now);
            handles.push(tokio::spawn(async move {
                repo.create_run_and_advance(&run, now, None).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "exactly one concurrent tick may win");

        let runs = repo.list_runs(&schedule.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn test_update_run_dispatched() {
        let repo = SqliteScheduleRepository::new(test_pool().await);
        let now = Utc::now();
        let schedule = sample_schedule(Some(now));
        repo.save_schedule(&schedule).await.unwrap();

        let run = planned_run(&schedule, now);
        repo.create_run_and_advance(&run, now, None).await.unwrap();

        let execution_id = Uuid::now_v7();
        repo.update_run(
            &run.id,
            ScheduleRunStatus::Dispatched,
            Some(now),
            Some(&execution_id),
            None,
        )
        .await
        .unwrap();

        let runs = repo.list_runs(&schedule.id, 10).await.unwrap();
        assert_eq!(runs[0].status, ScheduleRunStatus::Dispatched);
        assert_eq!(runs[0].execution_id, Some(execution_id));
        assert!(runs[0].fired_at.is_some());
    }

    #[tokio::test]
    async fn test_update_run_failed() {
        let repo = SqliteScheduleRepository::new(test_pool().await);
        let now = Utc::now();
        let schedule = sample_schedule(Some(now));
        repo.save_schedule(&schedule).await.unwrap();

        let run = planned_run(&schedule, now);
        repo.create_run_and_advance(&run, now, None).await.unwrap();

        repo.update_run(
            &run.id,
            ScheduleRunStatus::Failed,
            None,
            None,
            Some("engine unavailable"),
        )
        .await
        .unwrap();

        let runs = repo.list_runs(&schedule.id, 10).await.unwrap();
        assert_eq!(runs[0].status, ScheduleRunStatus::Failed);
        assert_eq!(runs[0].error_message.as_deref(), Some("engine unavailable"));
    }
}
