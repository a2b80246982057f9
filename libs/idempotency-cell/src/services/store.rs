use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::{IdempotencyError, IdempotencyRecord, IdempotencyStatus, ReservationOutcome};

/// Storage contract for idempotency records.
///
/// `try_reserve`, `complete` and `remove_if` must each be a single atomic
/// check-and-set with respect to other callers using the same key. A
/// reservation is identified by its key and the `created_at` it was made at.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Create an `IN_PROGRESS` record unless a live one exists.
    async fn try_reserve(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<ReservationOutcome, IdempotencyError>;

    /// Mark the reservation made at `reserved_at` `COMPLETED` with `response`,
    /// refreshing its expiry. Returns `false` without writing when the live
    /// record is not that `IN_PROGRESS` reservation.
    async fn complete(
        &self,
        key: &str,
        reserved_at: DateTime<Utc>,
        response: Value,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, IdempotencyError>;

    /// Delete the record only if it still has `status` and `created_at`.
    async fn remove_if(
        &self,
        key: &str,
        status: IdempotencyStatus,
        created_at: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError>;

    /// Fetch the record for `key`, live or not.
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError>;

    /// Drop expired records, returning how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyError>;
}
