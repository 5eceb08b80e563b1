//! 应用层错误定义
//!
//! 统一的命令错误类型，各端口错误在此归类

use thiserror::Error;

use crate::application::ports::{
    BackendError, JobError, LifecycleError, StorageError, WallpaperError,
};
use crate::domain::generation::{BackendKind, GenerationError};
use crate::domain::imaging::ImagingError;
use crate::domain::WorkflowError;

/// 应用层错误
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 后端 URL 或凭据缺失 / 无效
    #[error("Configuration error: {backend} requires '{field}' to be set")]
    Configuration {
        backend: BackendKind,
        field: &'static str,
    },

    /// 参数校验失败
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No Flux Kontext backend configured. Set flux_kontext_nim_url or invokeai_url")]
    NoBackendConfigured,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 容器启动失败
    #[error("Launch failed: {0}")]
    Launch(String),

    /// 后端响应格式不符合约定
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApplicationError {
    pub fn configuration(backend: BackendKind, field: &'static str) -> Self {
        Self::Configuration { backend, field }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 日志中的错误类别
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::NoBackendConfigured => "no_backend_configured",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Launch(_) => "launch",
            Self::Protocol(_) => "protocol",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<GenerationError> for ApplicationError {
    fn from(err: GenerationError) -> Self {
        Self::InvalidParameter(err.to_string())
    }
}

impl From<BackendError> for ApplicationError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::ServiceUnavailable(msg) => Self::ServiceUnavailable(msg),
            BackendError::Timeout => Self::ServiceUnavailable("request timed out".to_string()),
            BackendError::Protocol(msg) => Self::Protocol(msg),
        }
    }
}

impl From<LifecycleError> for ApplicationError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Launch(msg) => Self::Launch(msg),
            LifecycleError::Configuration { field } => Self::Configuration {
                backend: BackendKind::Nim,
                field,
            },
        }
    }
}

impl From<JobError> for ApplicationError {
    fn from(err: JobError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<StorageError> for ApplicationError {
    fn from(err: StorageError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<WallpaperError> for ApplicationError {
    fn from(err: WallpaperError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<ImagingError> for ApplicationError {
    fn from(err: ImagingError) -> Self {
        match err {
            ImagingError::NoImageFound(_) | ImagingError::DirectoryMissing(_) => {
                Self::InvalidParameter(err.to_string())
            }
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl From<WorkflowError> for ApplicationError {
    fn from(err: WorkflowError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_mapping() {
        let err: ApplicationError = BackendError::Timeout.into();
        assert_eq!(err.category(), "service_unavailable");

        let err: ApplicationError = BackendError::Protocol("no artifacts".into()).into();
        assert!(matches!(err, ApplicationError::Protocol(_)));
    }

    #[test]
    fn test_configuration_message_names_field() {
        let err = ApplicationError::configuration(BackendKind::InvokeAi, "invokeai_url");
        assert_eq!(
            err.to_string(),
            "Configuration error: INVOKEAI requires 'invokeai_url' to be set"
        );
    }
}
