//! NIM Service Port - NIM 服务探活与生命周期

use async_trait::async_trait;
use serde::Serialize;

use super::{LifecycleError, StartOutcome};
use crate::domain::generation::NimModel;

/// 健康检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub live: bool,
    pub ready: bool,
}

impl Readiness {
    pub const DOWN: Readiness = Readiness {
        live: false,
        ready: false,
    };
}

#[async_trait]
pub trait NimServicePort: Send + Sync {
    fn model(&self) -> NimModel;

    /// 是否为 NVIDIA 托管端点（无本地容器）
    fn is_hosted(&self) -> bool;

    /// 依次探测 live 与 ready，网络失败不返回错误
    async fn check_ready(&self) -> Readiness;

    async fn is_running(&self) -> Result<bool, LifecycleError>;

    async fn start(&self) -> Result<StartOutcome, LifecycleError>;

    async fn stop(&self) -> Result<(), LifecycleError>;
}
