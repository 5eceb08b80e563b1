//! Generation Context - Result

use std::time::Duration;

use super::BackendKind;
use crate::domain::imaging::{self, ImagingError};

/// 一次成功生成的结果，写盘后即丢弃
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub image: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub backend: BackendKind,
    pub duration: Duration,
}

impl GenerationResult {
    /// 从编码后的图片字节构造，尺寸从图片头读取
    pub fn from_encoded(
        image: Vec<u8>,
        backend: BackendKind,
        duration: Duration,
    ) -> Result<Self, ImagingError> {
        let (width, height) = imaging::image_dimensions(&image)?;
        Ok(Self {
            image,
            width,
            height,
            backend,
            duration,
        })
    }
}
