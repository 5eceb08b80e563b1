//! Generation Context - Value Objects

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::GenerationError;

/// 像素分辨率
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Kontext 工作流输入图固定尺寸
pub const KONTEXT_TARGET: Resolution = Resolution::new(1392, 752);

/// 宽高比（封闭集合，7 项）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Widescreen,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "5:4")]
    FiveByFour,
    #[serde(rename = "4:5")]
    FourByFive,
    #[serde(rename = "3:2")]
    ThreeByTwo,
    #[serde(rename = "2:3")]
    TwoByThree,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 7] = [
        AspectRatio::Square,
        AspectRatio::Widescreen,
        AspectRatio::Tall,
        AspectRatio::FiveByFour,
        AspectRatio::FourByFive,
        AspectRatio::ThreeByTwo,
        AspectRatio::TwoByThree,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Widescreen => "16:9",
            AspectRatio::Tall => "9:16",
            AspectRatio::FiveByFour => "5:4",
            AspectRatio::FourByFive => "4:5",
            AspectRatio::ThreeByTwo => "3:2",
            AspectRatio::TwoByThree => "2:3",
        }
    }

    /// NIM 接受的输出分辨率
    pub fn resolution(&self) -> Resolution {
        match self {
            AspectRatio::Square => Resolution::new(1024, 1024),
            AspectRatio::Widescreen => Resolution::new(1344, 768),
            AspectRatio::Tall => Resolution::new(768, 1344),
            AspectRatio::FiveByFour => Resolution::new(1280, 1024),
            AspectRatio::FourByFive => Resolution::new(1024, 1280),
            AspectRatio::ThreeByTwo => Resolution::new(1152, 768),
            AspectRatio::TwoByThree => Resolution::new(768, 1152),
        }
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        AspectRatio::Widescreen
    }
}

impl FromStr for AspectRatio {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        AspectRatio::ALL
            .into_iter()
            .find(|ratio| ratio.token() == token)
            .ok_or_else(|| GenerationError::UnknownAspectRatio(token.to_string()))
    }
}

/// 推理后端种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Nim,
    InvokeAi,
    ComfyUi,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Nim => "NIM",
            BackendKind::InvokeAi => "INVOKEAI",
            BackendKind::ComfyUi => "COMFYUI",
        }
    }

    /// 配置中对应的 URL 字段名
    pub fn url_field(&self) -> &'static str {
        match self {
            BackendKind::Nim => "flux_kontext_nim_url",
            BackendKind::InvokeAi => "invokeai_url",
            BackendKind::ComfyUi => "comfyui_url",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NIM" => Ok(BackendKind::Nim),
            "INVOKEAI" => Ok(BackendKind::InvokeAi),
            "COMFYUI" => Ok(BackendKind::ComfyUi),
            other => Err(GenerationError::UnknownBackend(other.to_string())),
        }
    }
}

/// 请求种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// 文生图（Flux dev）
    TextToImage,
    /// 图生图（Flux Kontext）
    Kontext,
}

/// NIM 托管的模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NimModel {
    FluxDev,
    FluxKontext,
}

impl NimModel {
    pub fn display_name(&self) -> &'static str {
        match self {
            NimModel::FluxDev => "Flux NIM",
            NimModel::FluxKontext => "Flux Kontext NIM",
        }
    }
}
