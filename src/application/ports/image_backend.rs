//! Image Backend Port - 图像生成后端抽象
//!
//! NIM / InvokeAI / ComfyUI 各自实现，统一返回 GenerationResult

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::generation::{BackendKind, GenerationResult, Resolution};

/// 后端错误
#[derive(Debug, Error)]
pub enum BackendError {
    /// 网络失败或 HTTP 非 2xx
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request timeout")]
    Timeout,

    /// 后端有响应但格式不符合约定
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl BackendError {
    /// 日志中的错误类别
    pub fn category(&self) -> &'static str {
        match self {
            BackendError::ServiceUnavailable(_) => "service_unavailable",
            BackendError::Timeout => "timeout",
            BackendError::Protocol(_) => "protocol",
        }
    }
}

/// 发往后端的生成参数
///
/// `image` 为已预处理好的 PNG（Kontext 请求），文生图时为 None。
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub prompt: String,
    pub image: Option<Vec<u8>>,
    pub resolution: Resolution,
    pub steps: u32,
    pub cfg_scale: f32,
    pub seed: u64,
}

/// 服务状态描述
#[derive(Debug, Clone, Default)]
pub struct ServiceStatus {
    pub summary: String,
    pub details: Vec<String>,
}

impl ServiceStatus {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            details: Vec::new(),
        }
    }

    pub fn with_detail(mut self, line: impl Into<String>) -> Self {
        self.details.push(line.into());
        self
    }

    /// 多行文本，供命令响应使用
    pub fn to_message(&self) -> String {
        std::iter::once(self.summary.as_str())
            .chain(self.details.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Image Backend Port
#[async_trait]
pub trait ImageBackendPort: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// 执行一次生成，阻塞直到结果可用或失败
    async fn generate(&self, request: BackendRequest) -> Result<GenerationResult, BackendError>;

    /// 查询服务状态
    async fn status(&self) -> Result<ServiceStatus, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_message_joins_lines() {
        let status = ServiceStatus::new("ComfyUI service is running.")
            .with_detail("Version: 0.3.40")
            .with_detail("GPU: RTX 4090");
        assert_eq!(
            status.to_message(),
            "ComfyUI service is running.\nVersion: 0.3.40\nGPU: RTX 4090"
        );
    }
}
