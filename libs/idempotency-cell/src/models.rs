use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    InProgress,
    Completed,
}

/// Stored record guarding one idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub status: IdempotencyStatus,
    /// Snapshot of the original response; only present once completed.
    pub response: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl IdempotencyRecord {
    pub fn in_progress(key: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key: key.to_string(),
            status: IdempotencyStatus::InProgress,
            response: None,
            created_at: now,
            expires_at: expiry(now, ttl),
        }
    }

    pub fn completed(key: &str, response: Value, created_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key: key.to_string(),
            status: IdempotencyStatus::Completed,
            response: Some(response),
            created_at,
            expires_at: expiry(now, ttl),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Outcome a new reservation attempt observes while this record is live.
    pub fn as_outcome(&self) -> ReservationOutcome {
        match (&self.status, &self.response) {
            (IdempotencyStatus::Completed, Some(response)) => ReservationOutcome::Replay(response.clone()),
            // A completed record without a payload cannot be replayed; treat it as still owned.
            _ => ReservationOutcome::InProgress,
        }
    }
}

/// Result of `reserve`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReservationOutcome {
    /// The caller owns the key and may perform the side effect.
    Acquired,
    /// Another attempt holds the key; no side effects allowed.
    InProgress,
    /// A previous attempt finished; replay its response.
    Replay(Value),
}
