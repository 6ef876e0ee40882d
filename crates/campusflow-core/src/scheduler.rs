//! Scheduler: periodic evaluation of schedules into deduplicated runs.
//!
//! `ScheduleCoordinator` ticks on a fixed interval, scans Active schedules
//! whose `next_run_at` has arrived, and materializes each due firing as a
//! `WorkflowScheduleRun`. Run creation and schedule advancement commit in
//! one repository transaction; the run's deterministic `dedupe_key` makes
//! concurrent ticks (including other engine instances) idempotent -- a lost
//! race is a silent no-op, never a double fire.
//!
//! Dispatch happens on a semaphore-bounded worker pool so a slow workflow
//! cannot stall the tick loop, and advancement is independent of dispatch
//! outcome so a failure cannot wedge the schedule.

use std::sync::Arc;
use std::time::Duration;

use campusflow_types::error::RepositoryError;
use campusflow_types::schedule::{
    ScheduleCadence, ScheduleRunStatus, WorkflowSchedule, WorkflowScheduleRun,
};
use chrono::{DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::repository::schedule::ScheduleRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while evaluating schedule cadences.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("invalid cadence: {0}")]
    InvalidCadence(String),

    #[error("no next occurrence for {0}")]
    NoOccurrence(String),
}

// ---------------------------------------------------------------------------
// Cadence evaluation
// ---------------------------------------------------------------------------

/// Deterministic dedupe key for one planned firing.
///
/// Stable for identical `(schedule_id, planned_run_at)` inputs; planned
/// times are keyed to the minute, matching the scheduler's resolution.
pub fn dedupe_key(schedule_id: Uuid, planned_run_at: DateTime<Utc>) -> String {
    format!(
        "{}:{}",
        schedule_id.simple(),
        planned_run_at.format("%Y%m%d%H%M")
    )
}

/// Compute the next fire time strictly after `after`.
///
/// Cron expressions and day-of-month times are evaluated in the schedule's
/// IANA timezone (unknown names fall back to UTC with a warning); the
/// result is always UTC.
pub fn next_occurrence(
    cadence: &ScheduleCadence,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let tz: Tz = timezone.parse().unwrap_or_else(|_| {
        tracing::warn!(timezone, "unknown timezone, falling back to UTC");
        chrono_tz::UTC
    });

    match cadence {
        ScheduleCadence::Cron { expression } => {
            let cron = expression
                .parse::<croner::Cron>()
                .map_err(|e| ScheduleError::InvalidCron(format!("{expression}: {e}")))?;
            let local = after.with_timezone(&tz);
            cron.iter_after(local)
                .next()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| ScheduleError::NoOccurrence(expression.clone()))
        }
        ScheduleCadence::EveryMinutes { minutes } => {
            if *minutes == 0 {
                return Err(ScheduleError::InvalidCadence(
                    "interval must be > 0 minutes".to_string(),
                ));
            }
            Ok(after + chrono::Duration::minutes(*minutes as i64))
        }
        ScheduleCadence::DayOfMonth { day, hour, minute } => {
            if !(1..=31).contains(day) || *hour > 23 || *minute > 59 {
                return Err(ScheduleError::InvalidCadence(format!(
                    "day={day} hour={hour} minute={minute}"
                )));
            }

            let local_after = after.with_timezone(&tz);
            let mut year = local_after.year();
            let mut month = local_after.month();

            // The candidate in the current month may already be past; one
            // month forward always yields a future occurrence.
            for _ in 0..2 {
                // Days past the month's end clamp to its last day.
                let clamped = (*day as u32).min(days_in_month(year, month));
                let naive = NaiveDate::from_ymd_opt(year, month, clamped)
                    .and_then(|d| d.and_hms_opt(*hour as u32, *minute as u32, 0))
                    .ok_or_else(|| {
                        ScheduleError::InvalidCadence(format!(
                            "day={day} hour={hour} minute={minute}"
                        ))
                    })?;
                let candidate = resolve_local(&tz, naive);
                if candidate > after {
                    return Ok(candidate);
                }
                (year, month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };
            }

            Err(ScheduleError::NoOccurrence("day_of_month".to_string()))
        }
    }
}

/// Number of days in a month.
fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Resolve a naive local time in `tz` to UTC.
///
/// Ambiguous times (DST fall-back) take the earlier offset; nonexistent
/// times (DST spring-forward gap) shift one hour later.
fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = naive + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}

// ---------------------------------------------------------------------------
// ScheduleCoordinator
// ---------------------------------------------------------------------------

/// Callback handing a created run to the execution runtime.
///
/// Returns the execution primary key on success, an error message on
/// failure.
pub type DispatchFn = Arc<
    dyn Fn(WorkflowScheduleRun) -> futures_util::future::BoxFuture<'static, Result<Uuid, String>>
        + Send
        + Sync,
>;

/// Tick-driven scheduler over the `ScheduleRepository` port.
pub struct ScheduleCoordinator<S: ScheduleRepository> {
    repo: S,
    dispatch: DispatchFn,
    /// Bounds concurrent dispatches so a slow execution cannot exhaust the
    /// runtime.
    workers: Arc<Semaphore>,
    tick_interval: Duration,
}

impl<S: ScheduleRepository + 'static> ScheduleCoordinator<S> {
    pub fn new(repo: S, dispatch: DispatchFn, tick_secs: u64, worker_count: usize) -> Arc<Self> {
        Arc::new(Self {
            repo,
            dispatch,
            workers: Arc::new(Semaphore::new(worker_count.max(1))),
            tick_interval: Duration::from_secs(tick_secs.max(1)),
        })
    }

    /// Run the tick loop until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: tokio_util::sync::CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            tick_secs = self.tick_interval.as_secs(),
            "schedule coordinator started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("schedule coordinator stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = Arc::clone(&self).tick(Utc::now()).await {
                        tracing::error!(error = %err, "scheduler tick failed");
                    }
                }
            }
        }
    }

    /// Evaluate all due schedules once. Returns the number of runs this
    /// tick created (duplicates claimed by other ticks are not counted).
    pub async fn tick(self: Arc<Self>, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let due = self.repo.list_due(now).await?;
        let mut created_count = 0;

        for schedule in due {
            let planned = schedule.next_run_at.unwrap_or(now);
            let after = planned.max(now);

            let next = match next_occurrence(&schedule.cadence, &schedule.timezone, after) {
                Ok(next) => Some(next),
                Err(err) => {
                    // Advance with no next fire time rather than re-scanning
                    // a broken cadence every tick.
                    tracing::error!(
                        schedule_id = %schedule.id,
                        error = %err,
                        "cadence evaluation failed, schedule parked"
                    );
                    None
                }
            };

            let run = WorkflowScheduleRun {
                id: Uuid::now_v7(),
                schedule_id: schedule.id,
                workflow_id: schedule.workflow_id,
                planned_run_at: planned,
                fired_at: None,
                status: ScheduleRunStatus::Created,
                dedupe_key: dedupe_key(schedule.id, planned),
                execution_id: None,
                error_message: None,
            };

            let created = self
                .repo
                .create_run_and_advance(&run, planned, next)
                .await?;
            if !created {
                // Another tick or instance already planned this firing.
                tracing::debug!(
                    schedule_id = %schedule.id,
                    dedupe_key = run.dedupe_key.as_str(),
                    "planned run already exists, skipping"
                );
                continue;
            }
            created_count += 1;

            // A run planned before the validity window opened (e.g. a
            // catch-up after downtime) is recorded but never fired.
            let before_window = schedule
                .start_date
                .map(|start| planned < start)
                .unwrap_or(false);
            if before_window {
                self.repo
                    .update_run(
                        &run.id,
                        ScheduleRunStatus::Skipped,
                        None,
                        None,
                        Some("planned time outside schedule validity window"),
                    )
                    .await?;
                continue;
            }

            let coordinator = Arc::clone(&self);
            tokio::spawn(async move {
                coordinator.dispatch_run(run).await;
            });
        }

        Ok(created_count)
    }

    /// Hand one created run to the execution runtime and record the outcome.
    pub async fn dispatch_run(&self, run: WorkflowScheduleRun) {
        let _permit = match self.workers.acquire().await {
            Ok(permit) => permit,
            Err(_) => return, // pool closed during shutdown
        };

        let run_id = run.id;
        let schedule_id = run.schedule_id;
        let result = (self.dispatch)(run).await;

        let update = match &result {
            Ok(execution_pk) => {
                tracing::info!(
                    %schedule_id,
                    %run_id,
                    execution = %execution_pk,
                    "schedule run dispatched"
                );
                self.repo
                    .update_run(
                        &run_id,
                        ScheduleRunStatus::Dispatched,
                        Some(Utc::now()),
                        Some(execution_pk),
                        None,
                    )
                    .await
            }
            Err(message) => {
                tracing::warn!(
                    %schedule_id,
                    %run_id,
                    error = message.as_str(),
                    "schedule run dispatch failed"
                );
                self.repo
                    .update_run(
                        &run_id,
                        ScheduleRunStatus::Failed,
                        None,
                        None,
                        Some(message),
                    )
                    .await
            }
        };

        if let Err(err) = update {
            tracing::error!(%run_id, error = %err, "failed to record dispatch outcome");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
