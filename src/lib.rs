//! Fluxgate - 图像生成命令路由
//!
//! 架构设计: DDD + Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - Generation: 生成请求、宽高比、输出结果
//! - Imaging: 参考图缩放裁剪、截图目录扫描
//! - Workflow: ComfyUI / InvokeAI 工作流模板
//!
//! 应用层 (application/):
//! - Ports: 端口定义（ImageBackend, NimService, ContainerRuntime, JobManager, Wallpaper）
//! - Selector: 后端选择
//! - Commands: 命令处理器与分发器
//!
//! 基础设施层 (infrastructure/):
//! - Adapters: NIM / InvokeAI / ComfyUI 客户端、容器控制、文件存储、壁纸
//! - Memory: JobManager 内存实现
//! - Worker: GenerationWorker 后台任务处理
//! - Events: 任务事件发布
//! - HTTP / Pipe: 命令传输

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{load_config, AppConfig};
