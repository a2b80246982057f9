use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdempotencyError {
    #[error("Idempotency key must not be empty")]
    EmptyKey,

    #[error("Idempotency key {0} is no longer held by this reservation")]
    ReservationLost(String),

    #[error("Idempotency store error: {0}")]
    StoreError(String),

    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    PoolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
