//! Service Control Ports - 后端专属控制接口

use async_trait::async_trait;
use serde::Deserialize;

use super::BackendError;

/// InvokeAI 队列与模型缓存控制
#[async_trait]
pub trait QueueControlPort: Send + Sync {
    async fn pause_queue(&self) -> Result<(), BackendError>;

    async fn resume_queue(&self) -> Result<(), BackendError>;

    async fn empty_model_cache(&self) -> Result<(), BackendError>;
}

/// ComfyUI /free 参数，两个开关缺省都为 true
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FreeMemoryOptions {
    #[serde(default = "default_true")]
    pub free_memory: bool,
    #[serde(default = "default_true")]
    pub unload_models: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FreeMemoryOptions {
    fn default() -> Self {
        Self {
            free_memory: true,
            unload_models: true,
        }
    }
}

/// ComfyUI 显存控制
#[async_trait]
pub trait MemoryControlPort: Send + Sync {
    async fn free_memory(&self, options: FreeMemoryOptions) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_memory_options_default_true() {
        let options: FreeMemoryOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, FreeMemoryOptions::default());

        let options: FreeMemoryOptions =
            serde_json::from_str(r#"{"unload_models": false}"#).unwrap();
        assert!(options.free_memory);
        assert!(!options.unload_models);
    }
}
