//! Worker Layer - Background Task Processing
//!
//! 实现 GenerationWorker 与过期任务清理

mod generation_worker;
mod job_gc;

pub use generation_worker::{GenerationWorker, GenerationWorkerConfig};
pub use job_gc::spawn_job_gc;
