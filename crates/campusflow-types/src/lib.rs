//! Shared domain types for CampusFlow.
//!
//! This crate contains the entities the workflow engine persists and passes
//! across crate boundaries: workflow definitions and their node linkage,
//! execution records, schedules, triggers, and the dedupe ledger row.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod schedule;
pub mod trigger;
pub mod workflow;
