// Live scheduler capability: trait surface plus the tokio-based engine

pub mod engine;
pub mod handler;
pub mod live;

pub use engine::TokioScheduler;
pub use handler::{FireContext, JobHandler, JOB_QUEUE_KEY};
pub use live::{FirePolicy, JobKey, JobSpec, LiveScheduler, MisfirePolicy, TriggerKey};
