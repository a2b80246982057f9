use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::{AsyncCommands, Script};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::services::store::IdempotencyStore;
use crate::{IdempotencyError, IdempotencyRecord, IdempotencyStatus, ReservationOutcome};

const KEY_PREFIX: &str = "idempotency";

// KEYS[1] record key; ARGV[1] expected status; ARGV[2] expected created_at;
// ARGV[3] replacement record; ARGV[4] ttl in milliseconds.
const COMPLETE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then return 0 end
local record = cjson.decode(current)
if record.status ~= ARGV[1] or record.created_at ~= ARGV[2] then return 0 end
redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
return 1
"#;

// KEYS[1] record key; ARGV[1] expected status; ARGV[2] expected created_at.
const REMOVE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then return 0 end
local record = cjson.decode(current)
if record.status ~= ARGV[1] or record.created_at ~= ARGV[2] then return 0 end
return redis.call('DEL', KEYS[1])
"#;

/// Redis-backed idempotency store.
///
/// Reservation is a single `SET key value NX PX ttl`; expiry is delegated to
/// Redis, so an abandoned `IN_PROGRESS` record disappears on its own.
/// Completion and removal compare the stored record in a Lua script.
pub struct RedisIdempotencyStore {
    pool: Pool,
    prefix: String,
}

impl RedisIdempotencyStore {
    pub async fn new(redis_url: &str) -> Result<Self, IdempotencyError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| IdempotencyError::PoolError(format!("Pool creation error: {}", e)))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| IdempotencyError::PoolError(format!("Connection error: {}", e)))?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis idempotency store initialized successfully");

        Ok(Self {
            pool,
            prefix: KEY_PREFIX.to_string(),
        })
    }

    /// Namespace keys, e.g. per test run.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    async fn get_connection(&self) -> Result<Connection, IdempotencyError> {
        self.pool
            .get()
            .await
            .map_err(|e| IdempotencyError::PoolError(format!("Connection error: {}", e)))
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    ttl.num_milliseconds().max(1)
}

/// A field value as it appears inside a stored record, for comparison in Lua.
fn json_text<T: Serialize>(value: &T) -> Result<String, IdempotencyError> {
    Ok(match serde_json::to_value(value)? {
        Value::String(text) => text,
        other => other.to_string(),
    })
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn try_reserve(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<ReservationOutcome, IdempotencyError> {
        let mut conn = self.get_connection().await?;
        let redis_key = self.redis_key(key);
        let payload = serde_json::to_string(&IdempotencyRecord::in_progress(key, now, ttl))?;

        // The second pass covers a record that expired between SET and GET.
        for _ in 0..2 {
            let created: Option<String> = redis::cmd("SET")
                .arg(&redis_key)
                .arg(&payload)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut conn)
                .await?;

            if created.is_some() {
                debug!("Idempotency key {} reserved in redis", key);
                return Ok(ReservationOutcome::Acquired);
            }

            let existing: Option<String> = conn.get(&redis_key).await?;
            if let Some(raw) = existing {
                let record: IdempotencyRecord = serde_json::from_str(&raw)?;
                return Ok(record.as_outcome());
            }
        }

        warn!("Idempotency key {} kept flapping between expiry and reservation", key);
        Ok(ReservationOutcome::InProgress)
    }

    async fn complete(
        &self,
        key: &str,
        reserved_at: DateTime<Utc>,
        response: Value,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, IdempotencyError> {
        let mut conn = self.get_connection().await?;
        let record = IdempotencyRecord::completed(key, response, reserved_at, now, ttl);

        let swapped: i64 = Script::new(COMPLETE_SCRIPT)
            .key(self.redis_key(key))
            .arg(json_text(&IdempotencyStatus::InProgress)?)
            .arg(json_text(&reserved_at)?)
            .arg(serde_json::to_string(&record)?)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;

        debug!("Idempotency key {} completion in redis applied={}", key, swapped == 1);
        Ok(swapped == 1)
    }

    async fn remove_if(
        &self,
        key: &str,
        status: IdempotencyStatus,
        created_at: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError> {
        let mut conn = self.get_connection().await?;

        let removed: i64 = Script::new(REMOVE_SCRIPT)
            .key(self.redis_key(key))
            .arg(json_text(&status)?)
            .arg(json_text(&created_at)?)
            .invoke_async(&mut conn)
            .await?;

        Ok(removed == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let mut conn = self.get_connection().await?;
        let existing: Option<String> = conn.get(self.redis_key(key)).await?;
        existing
            .map(|raw| serde_json::from_str(&raw).map_err(IdempotencyError::from))
            .transpose()
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, IdempotencyError> {
        // Redis evicts on PX expiry.
        Ok(0)
    }
}
