//! Container Runtime Port - 本地推理服务生命周期
//!
//! 通过远程 shell + 容器运行时启动 / 停止 NIM 容器

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// 进程无法启动或非零退出
    #[error("Launch failed: {0}")]
    Launch(String),

    /// 启动参数缺失或仍是占位值
    #[error("Missing or placeholder configuration: {field}")]
    Configuration { field: &'static str },
}

/// 容器启动描述
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// 宿主机端口，映射到容器内 8000
    pub host_port: u16,
    pub cache_dir: String,
    pub ngc_api_key: String,
    pub hf_token: String,
}

/// start 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Container Runtime Port
#[async_trait]
pub trait ContainerRuntimePort: Send + Sync {
    /// 启动容器，不等待服务就绪
    async fn start(&self, spec: &ContainerSpec) -> Result<StartOutcome, LifecycleError>;

    /// 停止容器，容器不存在视为成功
    async fn stop(&self, name: &str) -> Result<(), LifecycleError>;

    /// 容器是否在运行
    async fn is_running(&self, name: &str) -> Result<bool, LifecycleError>;
}
