//! 应用层 - 命令
//!
//! 生成任务提交、服务控制，以及按函数名分发的入口

mod generate_commands;
mod service_commands;

pub mod dispatcher;
pub mod handlers;

pub use dispatcher::{CommandDispatcher, CommandEnvelope, CommandResponse, DispatchOutcome, ToolCall};
pub use generate_commands::*;
pub use service_commands::*;
