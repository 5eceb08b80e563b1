//! Application Ports - 出站端口定义
//!
//! 定义应用层与基础设施层的抽象接口

mod container_runtime;
mod image_backend;
mod image_storage;
mod job_manager;
mod nim_service;
mod service_control;
mod wallpaper;

pub use container_runtime::{ContainerRuntimePort, ContainerSpec, LifecycleError, StartOutcome};
pub use image_backend::{BackendError, BackendRequest, ImageBackendPort, ServiceStatus};
pub use image_storage::{ImageStoragePort, StorageError};
pub use job_manager::{GenerationJob, JobError, JobManagerPort, JobState};
pub use nim_service::{NimServicePort, Readiness};
pub use service_control::{FreeMemoryOptions, MemoryControlPort, QueueControlPort};
pub use wallpaper::{WallpaperError, WallpaperPort};
