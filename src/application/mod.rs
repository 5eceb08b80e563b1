//! 应用层 - 用例编排
//!
//! 包含：
//! - ports: 六边形架构端口定义（ImageBackend、NimService、ContainerRuntime、JobManager 等）
//! - selector: 后端选择
//! - commands: 命令、处理器与分发器
//! - error: 应用层错误定义

pub mod commands;
pub mod error;
pub mod ports;
pub mod selector;

pub use commands::{
    handlers::{
        ComfyUiServiceHandler, InitializeHandler, InvokeAiServiceHandler, NimServiceHandler,
        QueryJobStatusHandler, SubmitGenerationHandler,
    },
    CommandDispatcher, CommandEnvelope, CommandResponse, DispatchOutcome,
};
pub use error::ApplicationError;
pub use selector::{select_backend, BackendRegistry, BackendSelection};
