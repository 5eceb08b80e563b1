//! Image Preprocessor - 图片预处理
//!
//! 纯函数: 截图查找、缩放裁剪、PNG 编码、base64 编解码

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use thiserror::Error;
use walkdir::WalkDir;

use crate::domain::generation::Resolution;

/// 识别为截图的扩展名
pub const SCREENSHOT_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tiff"];

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("No image files found in {0}")]
    NoImageFound(PathBuf),

    #[error("Directory does not exist: {0}")]
    DirectoryMissing(PathBuf),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Invalid base64 payload: {0}")]
    Base64(String),

    #[error("Image has zero size")]
    EmptyImage,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 递归查找目录中修改时间最新的图片
pub fn find_most_recent_image(dir: &Path) -> Result<PathBuf, ImagingError> {
    if !dir.is_dir() {
        return Err(ImagingError::DirectoryMissing(dir.to_path_buf()));
    }

    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || !has_image_extension(entry.path()) {
            continue;
        }
        let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
            Some(t) => t,
            None => continue,
        };
        let is_newer = newest.as_ref().map_or(true, |(t, _)| modified > *t);
        if is_newer {
            newest = Some((modified, entry.into_path()));
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| ImagingError::NoImageFound(dir.to_path_buf()))
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let ext = e.to_ascii_lowercase();
            SCREENSHOT_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// 源图中与目标同宽高比的居中裁剪区域 `(left, top, width, height)`
pub fn crop_region(source: Resolution, target: Resolution) -> (u32, u32, u32, u32) {
    let (sw, sh) = (source.width as u64, source.height as u64);
    let (tw, th) = (target.width as u64, target.height as u64);

    let (width, height) = if sw * th > sh * tw {
        // 源图更宽，裁掉左右
        (((sh * tw + th / 2) / th).clamp(1, sw), sh)
    } else {
        (sw, ((sw * th + tw / 2) / tw).clamp(1, sh))
    };

    let left = (sw - width) / 2;
    let top = (sh - height) / 2;
    (left as u32, top as u32, width as u32, height as u32)
}

/// 居中裁剪到目标宽高比后缩放到目标尺寸
///
/// 先在源图坐标上裁剪，峰值内存只与源图和目标尺寸有关。
/// 已是目标尺寸时原样返回，所以重复调用结果不变。
pub fn scale_and_crop(img: &DynamicImage, target: Resolution) -> Result<DynamicImage, ImagingError> {
    if img.width() == 0 || img.height() == 0 || target.width == 0 || target.height == 0 {
        return Err(ImagingError::EmptyImage);
    }
    if img.width() == target.width && img.height() == target.height {
        return Ok(img.clone());
    }

    let (left, top, width, height) =
        crop_region(Resolution::new(img.width(), img.height()), target);
    let cropped = img.crop_imm(left, top, width, height);
    Ok(cropped.resize_exact(target.width, target.height, FilterType::Lanczos3))
}

/// 解码任意支持格式，缩放裁剪后编码为 PNG
pub fn prepare_reference(bytes: &[u8], target: Resolution) -> Result<Vec<u8>, ImagingError> {
    let img = decode(bytes)?;
    let prepared = scale_and_crop(&img, target)?;
    encode_png(&prepared)
}

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ImagingError> {
    image::load_from_memory(bytes).map_err(|e| ImagingError::Decode(e.to_string()))
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ImagingError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| ImagingError::Encode(e.to_string()))?;
    Ok(buf)
}

/// 只读取图片头获取尺寸
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), ImagingError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()
        .map_err(|e| ImagingError::Decode(e.to_string()))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// 解码 base64，允许带 data URI 前缀
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, ImagingError> {
    let data = match payload.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => payload,
    };
    STANDARD
        .decode(data.trim())
        .map_err(|e| ImagingError::Base64(e.to_string()))
}

pub fn to_png_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", encode_base64(png))
}

#[cfg(test)]
pub(crate) fn solid_png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([40, 90, 160]),
    ));
    encode_png(&img).unwrap()
}
