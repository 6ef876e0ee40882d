//! Repository trait definitions (ports).
//!
//! Storage interfaces implemented by `campusflow-infra`. All traits use
//! native async fn in traits (Rust 2024 edition, no async_trait macro) and
//! return `RepositoryError` from `campusflow-types`.

pub mod dedupe;
pub mod definition;
pub mod execution;
pub mod schedule;
pub mod trigger;
