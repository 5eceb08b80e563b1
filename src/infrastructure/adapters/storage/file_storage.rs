//! File Storage - 生成图片的文件系统存储
//!
//! 实现 ImageStoragePort trait

use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::application::ports::{ImageStoragePort, StorageError};

/// 文件系统图片存储
pub struct FileImageStorage {
    /// 输出目录
    output_dir: PathBuf,
}

impl FileImageStorage {
    /// 目录在首次写入或自检时创建
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// `<prefix>_<YYYYmmdd_HHMMSS>_<短 id>.png`，同一秒内也不会冲突
    fn file_name(prefix: &str) -> String {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let short_id = Uuid::new_v4().simple().to_string();
        format!("{}_{}_{}.png", prefix, timestamp, &short_id[..8])
    }
}

#[async_trait]
impl ImageStoragePort for FileImageStorage {
    fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    async fn ensure_writable(&self) -> Result<(), StorageError> {
        let not_writable = |e: std::io::Error| StorageError::NotWritable {
            path: self.output_dir.clone(),
            reason: e.to_string(),
        };

        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(not_writable)?;

        let probe = self
            .output_dir
            .join(format!(".write_probe_{}", Uuid::new_v4().simple()));
        fs::write(&probe, b"probe").await.map_err(not_writable)?;
        fs::remove_file(&probe).await.map_err(not_writable)?;

        tracing::debug!(dir = %self.output_dir.display(), "Output directory is writable");
        Ok(())
    }

    async fn save(&self, prefix: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| StorageError::IoError(e.to_string()))?;

        let path = self.output_dir.join(Self::file_name(prefix));
        fs::write(&path, data)
            .await
            .map_err(|e| StorageError::IoError(e.to_string()))?;

        tracing::debug!(
            path = %path.display(),
            size = data.len(),
            "Saved generated image"
        );

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_creates_dir_and_names_file() {
        let temp_dir = tempdir().unwrap();
        let storage = FileImageStorage::new(temp_dir.path().join("nested/out"));

        let path = storage.save("flux_image", b"fake png").await.unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"fake png");

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("flux_image_"));
        assert!(name.ends_with(".png"));
        // flux_image_YYYYmmdd_HHMMSS_xxxxxxxx.png
        assert_eq!(name.len(), "flux_image_".len() + 15 + 1 + 8 + 4);
    }

    #[tokio::test]
    async fn test_names_do_not_collide() {
        let temp_dir = tempdir().unwrap();
        let storage = FileImageStorage::new(temp_dir.path());

        let a = storage.save("flux_image", b"a").await.unwrap();
        let b = storage.save("flux_image", b"b").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_ensure_writable_leaves_no_probe() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path().join("out");
        let storage = FileImageStorage::new(&dir);

        storage.ensure_writable().await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_writable_fails_when_path_is_file() {
        let temp_dir = tempdir().unwrap();
        let file = temp_dir.path().join("not_a_dir");
        std::fs::write(&file, b"x").unwrap();

        let storage = FileImageStorage::new(&file);
        assert!(matches!(
            storage.ensure_writable().await,
            Err(StorageError::NotWritable { .. })
        ));
    }
}
