//! Domain Layer - 领域层
//!
//! - Generation Context: 生成请求、宽高比、结果
//! - Imaging: 参考图预处理
//! - Workflow: InvokeAI / ComfyUI 工作流模板

pub mod generation;
pub mod imaging;
pub mod workflow;

pub use workflow::{ComfyWorkflow, InvokeBatch, WorkflowError};
