//! Service Commands - 后端服务控制命令

use crate::application::ports::FreeMemoryOptions;

/// NIM 服务操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NimServiceAction {
    ReadyCheck,
    Status,
    Start,
    Stop,
}

/// InvokeAI 操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeAiAction {
    Status,
    PauseQueue,
    ResumeQueue,
    EmptyModelCache,
}

/// ComfyUI 操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComfyUiAction {
    Status,
    FreeMemory(FreeMemoryOptions),
}

/// initialize 检查结果，警告不影响成功
#[derive(Debug, Clone, Default)]
pub struct InitializeReport {
    pub warnings: Vec<String>,
}

impl InitializeReport {
    pub fn message(&self) -> String {
        if self.warnings.is_empty() {
            "initialize success.".to_string()
        } else {
            format!(
                "initialize success. Plugin initialized with warnings: {}",
                self.warnings.join("; ")
            )
        }
    }
}
