//! Image Storage Port - 输出图片持久化

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Output directory not writable: {path}: {reason}")]
    NotWritable { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    IoError(String),
}

#[async_trait]
pub trait ImageStoragePort: Send + Sync {
    fn output_dir(&self) -> &Path;

    /// 创建输出目录并确认可写
    async fn ensure_writable(&self) -> Result<(), StorageError>;

    /// 以 `<prefix>_<时间戳>_<短 id>.png` 命名写入
    async fn save(&self, prefix: &str, data: &[u8]) -> Result<PathBuf, StorageError>;
}
