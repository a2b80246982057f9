use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::services::memory::InMemoryIdempotencyStore;
use crate::services::store::IdempotencyStore;
use crate::{IdempotencyError, IdempotencyRecord, IdempotencyStatus, ReservationOutcome};

/// Exactly-once-effect protocol over an [`IdempotencyStore`].
///
/// Callers `reserve` a key before producing a side effect and `complete` it
/// with the response afterwards, passing the instant they reserved at. A
/// rejection before any side effect should `release` the key; a fault between
/// the two leaves the record `IN_PROGRESS` until its TTL lapses, after which
/// a retry may reclaim it.
#[derive(Clone)]
pub struct IdempotencyLedger {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
}

impl IdempotencyLedger {
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryIdempotencyStore::new()), ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[instrument(skip(self))]
    pub async fn reserve(&self, key: &str, now: DateTime<Utc>) -> Result<ReservationOutcome, IdempotencyError> {
        ensure_key(key)?;

        let outcome = self.store.try_reserve(key, now, self.ttl).await?;
        match &outcome {
            ReservationOutcome::Acquired => debug!("Idempotency key {} acquired", key),
            ReservationOutcome::InProgress => warn!("Idempotency key {} already in progress", key),
            ReservationOutcome::Replay(_) => info!("Idempotency key {} replaying stored response", key),
        }

        Ok(outcome)
    }

    /// Store `response` for the reservation made at `reserved_at`.
    ///
    /// Fails with `ReservationLost` when the record expired or another
    /// attempt reclaimed the key in the meantime; nothing is written then.
    #[instrument(skip(self, response))]
    pub async fn complete(
        &self,
        key: &str,
        reserved_at: DateTime<Utc>,
        response: Value,
        now: DateTime<Utc>,
    ) -> Result<(), IdempotencyError> {
        ensure_key(key)?;
        if !self.store.complete(key, reserved_at, response, now, self.ttl).await? {
            warn!("Idempotency key {} lost its reservation before completion", key);
            return Err(IdempotencyError::ReservationLost(key.to_string()));
        }
        debug!("Idempotency key {} completed", key);
        Ok(())
    }

    /// Give up the reservation made at `reserved_at` so the key can be
    /// reserved again right away.
    #[instrument(skip(self))]
    pub async fn release(&self, key: &str, reserved_at: DateTime<Utc>) -> Result<bool, IdempotencyError> {
        ensure_key(key)?;
        let released = self
            .store
            .remove_if(key, IdempotencyStatus::InProgress, reserved_at)
            .await?;
        if released {
            debug!("Idempotency key {} released", key);
        }
        Ok(released)
    }

    /// Forget a completed record whose response no longer applies. Only the
    /// exact record passed in is removed.
    #[instrument(skip(self, record), fields(key = %record.key))]
    pub async fn discard_completed(&self, record: &IdempotencyRecord) -> Result<bool, IdempotencyError> {
        if record.status != IdempotencyStatus::Completed {
            return Ok(false);
        }
        let discarded = self
            .store
            .remove_if(&record.key, IdempotencyStatus::Completed, record.created_at)
            .await?;
        if discarded {
            info!("Discarded stale completed idempotency record {}", record.key);
        }
        Ok(discarded)
    }

    /// Read-only lookup; expired records are reported as absent.
    pub async fn peek(&self, key: &str, now: DateTime<Utc>) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        ensure_key(key)?;
        Ok(self.store.get(key).await?.filter(|record| !record.is_expired(now)))
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyError> {
        let purged = self.store.purge_expired(now).await?;
        if purged > 0 {
            info!("Purged {} expired idempotency records", purged);
        }
        Ok(purged)
    }
}

fn ensure_key(key: &str) -> Result<(), IdempotencyError> {
    if key.trim().is_empty() {
        return Err(IdempotencyError::EmptyKey);
    }
    Ok(())
}
