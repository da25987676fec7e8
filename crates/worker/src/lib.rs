pub mod handlers;
pub mod pool;

pub use handlers::{HandlerError, HandlerRegistry, JobHandler};
pub use pool::{WorkerPool, WorkerPoolBuilder};
