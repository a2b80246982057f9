pub mod ledger;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use ledger::IdempotencyLedger;
pub use memory::InMemoryIdempotencyStore;
pub use redis_store::RedisIdempotencyStore;
pub use store::IdempotencyStore;
