pub mod database;
pub mod memory_transport;
pub mod redis_transport;

pub use database::PostgresJobStore;
pub use memory_transport::InMemoryTransport;
pub use redis_transport::RedisTransport;
