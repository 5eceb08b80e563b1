//! Infrastructure Layer - 基础设施层
//!
//! 提供所有端口的具体实现，以及 HTTP 与管道两种传输

pub mod adapters;
pub mod events;
pub mod http;
pub mod memory;
pub mod pipe;
pub mod worker;

pub use events::EventPublisher;
pub use memory::InMemoryJobManager;
pub use pipe::PipeServer;
pub use worker::{GenerationWorker, GenerationWorkerConfig};
