//! Dedupe guard: exactly-once reservation of operation keys.
//!
//! Consulted by the execution runtime (per-node side-effect keys) and by
//! the trigger router (event idempotency keys). The guard is a thin service
//! over the `DedupeRepository` port; correctness depends entirely on the
//! persistence layer enforcing the uniqueness constraint atomically under
//! concurrent writers -- multiple engine instances share one ledger, so no
//! in-process lock can substitute.

use campusflow_types::error::RepositoryError;
use campusflow_types::trigger::NodeDedupeRecord;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::repository::dedupe::DedupeRepository;

/// Exactly-once reservation guard over the dedupe ledger.
#[derive(Clone)]
pub struct DedupeGuard<L: DedupeRepository> {
    repo: L,
}

impl<L: DedupeRepository> DedupeGuard<L> {
    pub fn new(repo: L) -> Self {
        Self { repo }
    }

    /// Reserve an operation key.
    ///
    /// Returns `true` exactly once per logical key
    /// `(workflow_id, node_template_id, scope, operation_key)` -- `false`
    /// for every repeat while the reservation is live. With `ttl` set the
    /// reservation expires and the key may be taken again.
    pub async fn reserve(
        &self,
        workflow_id: Uuid,
        node_template_id: Option<Uuid>,
        scope: Option<String>,
        schedule_run_id: Option<Uuid>,
        operation_key: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, RepositoryError> {
        let now = Utc::now();
        let record = NodeDedupeRecord {
            id: Uuid::now_v7(),
            workflow_id,
            node_template_id,
            scope,
            schedule_run_id,
            operation_key: operation_key.to_string(),
            reserved_at: now,
            expires_at: ttl.map(|d| now + d),
        };

        let reserved = self.repo.reserve(&record).await?;
        if reserved {
            tracing::debug!(
                %workflow_id,
                operation_key,
                "reserved operation key"
            );
        } else {
            tracing::debug!(
                %workflow_id,
                operation_key,
                "operation key already reserved, skipping"
            );
        }
        Ok(reserved)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
