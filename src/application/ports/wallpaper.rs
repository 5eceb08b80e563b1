//! Wallpaper Port - 桌面壁纸设置

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WallpaperError {
    #[error("Wallpaper command failed: {0}")]
    CommandFailed(String),
}

#[async_trait]
pub trait WallpaperPort: Send + Sync {
    async fn apply(&self, image_path: &Path) -> Result<(), WallpaperError>;
}
