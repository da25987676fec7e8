pub mod engine;
pub mod policy;

pub use engine::{EngineSettings, SchedulerEngine};
pub use policy::PolicyQueue;
