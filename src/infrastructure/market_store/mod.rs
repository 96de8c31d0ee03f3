pub mod memory;
pub mod redis_store;

pub use memory::InMemoryMarketStore;
pub use redis_store::RedisMarketStore;
