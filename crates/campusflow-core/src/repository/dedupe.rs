//! Dedupe ledger repository trait.

use campusflow_types::error::RepositoryError;
use campusflow_types::trigger::NodeDedupeRecord;

/// Repository trait for the dedupe ledger.
///
/// `reserve` MUST be a single atomic insert attempt against the uniqueness
/// constraint on the logical key -- never a check followed by an insert.
/// Multiple engine instances share the ledger; the database constraint is
/// the only synchronization.
pub trait DedupeRepository: Send + Sync {
    /// Attempt to reserve the record's logical key.
    ///
    /// Returns `true` on first use, `false` when the key is already held by
    /// an unexpired reservation. An expired reservation may be re-taken (the
    /// takeover must be part of the same atomic statement).
    fn reserve(
        &self,
        record: &NodeDedupeRecord,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
