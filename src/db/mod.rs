pub mod redis;
pub mod store;

pub use self::redis::create_redis_client;
pub use self::redis::Cache;
pub use self::redis::CacheKey;
pub use self::redis::CacheWriterHandle;
pub use store::InMemoryStore;
pub use store::RecsStore;
