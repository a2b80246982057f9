use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;

use crate::services::store::IdempotencyStore;
use crate::{IdempotencyError, IdempotencyRecord, IdempotencyStatus, ReservationOutcome};

/// Process-local idempotency store: one mutex-guarded map.
///
/// Every check-and-set happens inside a single lock section, which is what
/// makes concurrent `try_reserve` calls on one key mutually exclusive.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, IdempotencyRecord>>, IdempotencyError> {
        self.records
            .lock()
            .map_err(|_| IdempotencyError::StoreError("idempotency map lock poisoned".to_string()))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn try_reserve(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<ReservationOutcome, IdempotencyError> {
        let mut records = self.lock()?;

        if let Some(existing) = records.get(key) {
            if !existing.is_expired(now) {
                return Ok(existing.as_outcome());
            }
            debug!("Reclaiming expired idempotency record {}", key);
        }

        records.insert(key.to_string(), IdempotencyRecord::in_progress(key, now, ttl));
        Ok(ReservationOutcome::Acquired)
    }

    async fn complete(
        &self,
        key: &str,
        reserved_at: DateTime<Utc>,
        response: Value,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, IdempotencyError> {
        let mut records = self.lock()?;

        let owned = records.get(key).is_some_and(|record| {
            record.status == IdempotencyStatus::InProgress
                && record.created_at == reserved_at
                && !record.is_expired(now)
        });
        if !owned {
            debug!("Idempotency key {} no longer held by the reservation from {}", key, reserved_at);
            return Ok(false);
        }

        records.insert(
            key.to_string(),
            IdempotencyRecord::completed(key, response, reserved_at, now, ttl),
        );
        Ok(true)
    }

    async fn remove_if(
        &self,
        key: &str,
        status: IdempotencyStatus,
        created_at: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError> {
        let mut records = self.lock()?;

        let matches = records
            .get(key)
            .is_some_and(|record| record.status == status && record.created_at == created_at);
        if matches {
            records.remove(key);
        }
        Ok(matches)
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, IdempotencyError> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok((before - records.len()) as u64)
    }
}
