//! Schedule types: recurring trigger definitions and their planned firings.
//!
//! A `WorkflowSchedule` describes *when* a workflow should fire; the
//! scheduler materializes each due firing as a `WorkflowScheduleRun` whose
//! `dedupe_key` is unique per (schedule, planned minute), so a given minute
//! is only ever fired once even under concurrent scheduler ticks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Cadence
// ---------------------------------------------------------------------------

/// How a schedule's fire times are computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleCadence {
    /// Standard 5-field cron expression, evaluated in the schedule's timezone.
    Cron { expression: String },
    /// Fixed interval in minutes.
    EveryMinutes { minutes: u32 },
    /// A specific day of the month at a local time. Days past the end of a
    /// month clamp to the month's last day.
    DayOfMonth { day: u8, hour: u8, minute: u8 },
}

/// Lifecycle status of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Active,
    Paused,
}

/// A recurring trigger definition for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSchedule {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub cadence: ScheduleCadence,
    /// IANA timezone name (e.g. "Asia/Kolkata"). Cadence evaluation happens
    /// in this zone; stored instants are always UTC.
    pub timezone: String,
    /// Validity window. A schedule outside `[start_date, end_date]` never
    /// fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    pub status: ScheduleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Schedule runs
// ---------------------------------------------------------------------------

/// Status of one planned firing of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleRunStatus {
    /// Row inserted, not yet handed to the execution runtime.
    Created,
    /// Handed to the execution runtime.
    Dispatched,
    /// Deliberately not fired (outside validity window at dispatch time).
    Skipped,
    /// Dispatch failed; see `error_message`.
    Failed,
}

/// One planned firing of a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowScheduleRun {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub workflow_id: Uuid,
    /// The fire time the scheduler planned for.
    pub planned_run_at: DateTime<Utc>,
    /// When the run was actually handed to the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fired_at: Option<DateTime<Utc>>,
    pub status: ScheduleRunStatus,
    /// Deterministic key, unique per (schedule, planned time).
    pub dedupe_key: String,
    /// Execution created by a successful dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
