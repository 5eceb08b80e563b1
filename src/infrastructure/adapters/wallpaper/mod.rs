//! Wallpaper Adapter - 设置桌面壁纸
//!
//! CommandWallpaper 执行配置的命令，`{path}` 替换为图片绝对路径

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::application::ports::{WallpaperError, WallpaperPort};
use crate::infrastructure::adapters::container::ProcessRunner;

pub struct CommandWallpaper {
    runner: Arc<dyn ProcessRunner>,
    command: Vec<String>,
}

impl CommandWallpaper {
    pub fn new(runner: Arc<dyn ProcessRunner>, command: Vec<String>) -> Self {
        Self { runner, command }
    }
}

#[async_trait]
impl WallpaperPort for CommandWallpaper {
    async fn apply(&self, image_path: &Path) -> Result<(), WallpaperError> {
        let absolute = tokio::fs::canonicalize(image_path)
            .await
            .map_err(|e| WallpaperError::CommandFailed(format!("{}: {}", image_path.display(), e)))?;
        let path = absolute.to_string_lossy();

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| WallpaperError::CommandFailed("empty command".to_string()))?;
        let args: Vec<String> = args.iter().map(|arg| arg.replace("{path}", &path)).collect();

        let output = self
            .runner
            .run(program, &args)
            .await
            .map_err(|e| WallpaperError::CommandFailed(format!("{}: {}", program, e)))?;
        if !output.success() {
            return Err(WallpaperError::CommandFailed(format!(
                "{} exited with {:?}: {}",
                program,
                output.exit_code,
                output.stderr.trim()
            )));
        }

        tracing::info!(path = %path, "Wallpaper updated");
        Ok(())
    }
}

/// 未启用壁纸时使用
pub struct NoopWallpaper;

#[async_trait]
impl WallpaperPort for NoopWallpaper {
    async fn apply(&self, image_path: &Path) -> Result<(), WallpaperError> {
        tracing::debug!(path = %image_path.display(), "Wallpaper disabled, skipping");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) use recording::RecordingWallpaper;

#[cfg(test)]
mod recording {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// 记录调用路径，可配置为失败
    #[derive(Default)]
    pub struct RecordingWallpaper {
        applied: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    impl RecordingWallpaper {
        pub fn failing() -> Self {
            Self {
                applied: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn applied(&self) -> Vec<PathBuf> {
            self.applied.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WallpaperPort for RecordingWallpaper {
        async fn apply(&self, image_path: &Path) -> Result<(), WallpaperError> {
            self.applied.lock().unwrap().push(image_path.to_path_buf());
            if self.fail {
                return Err(WallpaperError::CommandFailed("no desktop session".to_string()));
            }
            Ok(())
        }
    }
}
